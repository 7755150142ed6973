use anyhow::Result;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

/// Bodies at or below this size are sent as-is
pub const MIN_COMPRESS_LEN: usize = 1000;

/// Compress data using gzip
pub fn gzip_compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Whether a response body should go out gzip-encoded
pub fn should_compress(accept_encoding: Option<&str>, len: usize) -> bool {
    let accepts_gzip = accept_encoding
        .map(|v| v.split(',').any(|enc| enc.trim().starts_with("gzip")))
        .unwrap_or(false);
    accepts_gzip && len > MIN_COMPRESS_LEN
}

/// Content type by file extension for the static dashboard files
pub fn content_type_for(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) => match ext.as_str() {
            "html" | "htm" => "text/html",
            "css" => "text/css",
            "js" => "application/javascript",
            "json" => "application/json",
            "svg" => "image/svg+xml",
            "png" => "image/png",
            "ico" => "image/x-icon",
            _ => "application/octet-stream",
        },
        None => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_gzip_compress() {
        let data = b"Hello, World! This is a test of gzip compression.";
        let compressed = gzip_compress(data).unwrap();

        // Check gzip magic number
        assert_eq!(&compressed[0..2], &[0x1f, 0x8b]);

        let mut decoded = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_should_compress() {
        assert!(should_compress(Some("gzip, deflate, br"), 4096));
        assert!(should_compress(Some("deflate, gzip;q=0.8"), 1001));
        assert!(!should_compress(Some("gzip"), 1000));
        assert!(!should_compress(Some("deflate"), 4096));
        assert!(!should_compress(None, 4096));
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("/index.html"), "text/html");
        assert_eq!(content_type_for("/app.JS"), "application/javascript");
        assert_eq!(content_type_for("/style.css"), "text/css");
        assert_eq!(content_type_for("/README"), "application/octet-stream");
    }
}
