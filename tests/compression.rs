#[cfg(any(
    feature = "compression-gzip",
    feature = "compression-zstd",
    feature = "compression-bzip2",
    feature = "compression-xz"
))]
mod compression_tests {
    use anyhow::Result;
    use std::io::{Read, Write};
    use strata::compression::{auto_detect_reader, auto_detect_writer, strip_codec_extension};
    use strata::fs::{FileSystem, MemoryFileSystem};

    const LINES: &str = "id,name\n1,Alice\n2,Bob\n3,Charlie\n";

    fn write_compressed(fs: &MemoryFileSystem, path: &str) -> Result<()> {
        let mut sink = auto_detect_writer(fs.open_output_stream(path)?)?;
        sink.write_all(LINES.as_bytes())?;
        sink.close()?;
        Ok(())
    }

    fn read_back(fs: &MemoryFileSystem, stored: &str, hint: &str) -> Result<String> {
        let file = fs.open_input_file(stored)?;
        let mut reader = auto_detect_reader(Box::new(file), hint)?;
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        Ok(text)
    }

    fn roundtrip(path: &str) -> Result<()> {
        let fs = MemoryFileSystem::new();
        write_compressed(&fs, path)?;
        assert_ne!(fs.read(path)?.as_ref(), LINES.as_bytes());
        assert_eq!(read_back(&fs, path, path)?, LINES);
        Ok(())
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn test_gzip_roundtrip() -> Result<()> {
        roundtrip("data/part-0.csv.gz")
    }

    #[cfg(feature = "compression-zstd")]
    #[test]
    fn test_zstd_roundtrip() -> Result<()> {
        roundtrip("data/part-0.csv.zst")
    }

    #[cfg(feature = "compression-bzip2")]
    #[test]
    fn test_bzip2_roundtrip() -> Result<()> {
        roundtrip("data/part-0.csv.bz2")
    }

    #[cfg(feature = "compression-xz")]
    #[test]
    fn test_xz_roundtrip() -> Result<()> {
        roundtrip("data/part-0.csv.xz")
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn test_magic_bytes_without_extension() -> Result<()> {
        let fs = MemoryFileSystem::new();
        write_compressed(&fs, "data/blob.gz")?;
        fs.put("data/blob", fs.read("data/blob.gz")?);
        assert_eq!(read_back(&fs, "data/blob", "data/blob")?, LINES);
        Ok(())
    }

    #[test]
    fn test_uncompressed_passthrough() -> Result<()> {
        let fs = MemoryFileSystem::new();
        fs.put("plain.csv", LINES);
        assert_eq!(read_back(&fs, "plain.csv", "plain.csv")?, LINES);
        Ok(())
    }

    #[cfg(feature = "compression-gzip")]
    #[test]
    fn test_codec_extension_is_stripped() {
        assert_eq!(strip_codec_extension("a/part-0.csv.gz"), "a/part-0.csv");
        assert_eq!(strip_codec_extension("a/part-0.CSV.GZ"), "a/part-0.CSV");
        assert_eq!(strip_codec_extension("a/part-0.csv"), "a/part-0.csv");
    }
}
