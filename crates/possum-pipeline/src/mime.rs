//! MIME type guessing from file extensions

const DEFAULT: &str = "application/octet-stream";

/// Guess a MIME type from the file name's extension.
pub fn guess_mime(name: &str) -> &'static str {
    mime_guess::from_path(name).first_raw().unwrap_or(DEFAULT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions() {
        assert_eq!(guess_mime("notes.txt"), "text/plain");
        assert_eq!(guess_mime("Photo.JPG"), "image/jpeg");
        assert_eq!(guess_mime("dir/report.pdf"), "application/pdf");
        assert_eq!(guess_mime("archive.tar"), "application/x-tar");
    }

    #[test]
    fn unknown_or_missing_extension_defaults() {
        assert_eq!(guess_mime("blob.notarealext"), DEFAULT);
        assert_eq!(guess_mime("Makefile"), DEFAULT);
        assert_eq!(guess_mime(""), DEFAULT);
    }
}
