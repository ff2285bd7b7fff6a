use anyhow::Result;
use std::io::{Read, Write};
use strata::fs::{FileSelector, FileSystem, MemoryFileSystem, from_uri_or_path};
use strata::testing::temp_local_fs;
use strata::ErrorKind;

fn write_file(fs: &dyn FileSystem, path: &str, data: &[u8]) -> Result<()> {
    let mut out = fs.open_output_stream(path)?;
    out.write_all(data)?;
    out.close()?;
    Ok(())
}

#[test]
fn create_dir_is_idempotent_on_local_disk() -> Result<()> {
    let (_dir, fs) = temp_local_fs()?;
    fs.create_dir("a/b/c", true)?;
    fs.create_dir("a/b/c", true)?;
    assert!(fs.get_file_info("a/b")?.is_dir());
    Ok(())
}

#[test]
fn non_recursive_create_needs_a_parent() -> Result<()> {
    let fs = MemoryFileSystem::new();
    let err = fs.create_dir("x/y", false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    fs.create_dir("x", false)?;
    fs.create_dir("x/y", false)?;
    Ok(())
}

#[test]
fn output_streams_create_parents_and_truncate() -> Result<()> {
    let (_dir, fs) = temp_local_fs()?;
    write_file(fs.as_ref(), "deep/nested/file.txt", b"first version")?;
    write_file(fs.as_ref(), "deep/nested/file.txt", b"second")?;

    let mut text = String::new();
    fs.open_input_file("deep/nested/file.txt")?
        .read_to_string(&mut text)?;
    assert_eq!(text, "second");
    assert_eq!(fs.get_file_info("deep/nested/file.txt")?.size, Some(6));
    Ok(())
}

#[test]
fn listing_honours_recursion_and_patterns() -> Result<()> {
    let fs = MemoryFileSystem::new();
    fs.put("root/a.parquet", vec![0u8; 4]);
    fs.put("root/b.csv", vec![0u8; 4]);
    fs.put("root/sub/c.parquet", vec![0u8; 4]);

    let flat: Vec<String> = fs
        .list_files(&FileSelector::new("root"))?
        .into_iter()
        .filter(|f| f.is_file())
        .map(|f| f.path)
        .collect();
    assert_eq!(flat, vec!["root/a.parquet", "root/b.csv"]);

    let parquet: Vec<String> = fs
        .list_files(&FileSelector::new("root").recursive(true).with_pattern("*.parquet")?)?
        .into_iter()
        .filter(|f| f.is_file())
        .map(|f| f.path)
        .collect();
    assert_eq!(parquet, vec!["root/a.parquet", "root/sub/c.parquet"]);
    Ok(())
}

#[test]
fn missing_base_dir_is_not_found_unless_allowed() -> Result<()> {
    let (_dir, fs) = temp_local_fs()?;
    let err = fs.list_files(&FileSelector::new("nowhere")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let listed = fs.list_files(&FileSelector::new("nowhere").allow_not_found(true))?;
    assert!(listed.is_empty());
    Ok(())
}

#[test]
fn delete_dir_contents_keeps_the_directory() -> Result<()> {
    let fs = MemoryFileSystem::new();
    fs.put("out/a=1/part-0.csv", "x");
    fs.put("out/a=2/part-0.csv", "y");
    fs.put("keep/me.csv", "z");
    fs.delete_dir_contents("out")?;
    assert!(fs.get_file_info("out")?.is_dir());
    assert_eq!(fs.file_count(), 1);
    Ok(())
}

#[test]
fn local_paths_cannot_escape_the_root() -> Result<()> {
    let (_dir, fs) = temp_local_fs()?;
    let err = fs.get_file_info("../outside").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    Ok(())
}

#[test]
fn uris_and_paths_resolve_to_filesystems() -> Result<()> {
    let (fs, inner) = from_uri_or_path("memory://scratch/set")?;
    assert_eq!(fs.type_name(), "memory");
    assert_eq!(inner, "scratch/set");

    let dir = tempfile::tempdir()?;
    let (fs, inner) = from_uri_or_path(&dir.path().to_string_lossy())?;
    assert_eq!(fs.type_name(), "local");
    assert!(!inner.starts_with('/'));
    assert!(fs.get_file_info(&inner)?.is_dir());

    let err = from_uri_or_path("s3://bucket/key").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invalid);
    Ok(())
}
