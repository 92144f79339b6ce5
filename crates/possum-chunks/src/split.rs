//! Fixed-size block splitting
//!
//! Every block is exactly `block_size` bytes except possibly the last one.
//! Splitting is lazy: `split` borrows slices out of an in-memory buffer and
//! `BlockReader` pulls blocks out of any `Read` without buffering the whole
//! input. Both are deterministic and concatenating the output in order
//! reproduces the input exactly. Empty input yields no blocks.

use std::io::{self, Read};

use possum_core::{PossumError, PossumResult};

/// Iterator over borrowed fixed-size blocks of an in-memory buffer.
#[derive(Debug, Clone)]
pub struct Blocks<'a> {
    data: &'a [u8],
    block_size: usize,
}

impl<'a> Iterator for Blocks<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.data.is_empty() {
            return None;
        }
        let take = self.block_size.min(self.data.len());
        let (head, tail) = self.data.split_at(take);
        self.data = tail;
        Some(head)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = block_count(self.data.len() as u64, self.block_size) as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Blocks<'_> {}

/// Split `data` into blocks of `block_size` bytes.
pub fn split(data: &[u8], block_size: usize) -> PossumResult<Blocks<'_>> {
    check_block_size(block_size)?;
    Ok(Blocks { data, block_size })
}

/// Number of blocks `len` bytes split into.
pub fn block_count(len: u64, block_size: usize) -> u64 {
    if block_size == 0 {
        return 0;
    }
    len.div_ceil(block_size as u64)
}

fn check_block_size(block_size: usize) -> PossumResult<()> {
    if block_size == 0 {
        return Err(PossumError::Input("block size must be greater than zero".into()));
    }
    Ok(())
}

/// Streaming splitter over a reader.
///
/// Short reads are coalesced, so every yielded block except the last is
/// exactly `block_size` bytes regardless of how the reader fragments data.
pub struct BlockReader<R> {
    inner: R,
    block_size: usize,
    done: bool,
}

impl<R: Read> BlockReader<R> {
    pub fn new(inner: R, block_size: usize) -> PossumResult<Self> {
        check_block_size(block_size)?;
        Ok(Self {
            inner,
            block_size,
            done: false,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    fn fill_block(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; self.block_size];
        let mut filled = 0;
        while filled < self.block_size {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

impl<R: Read> Iterator for BlockReader<R> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.fill_block() {
            Ok(block) if block.is_empty() => None,
            Ok(block) => Some(Ok(block)),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
