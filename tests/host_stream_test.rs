// tests/host_stream_test.rs
//
// HostStream over real Rust resources: Cursor for memory, tempfile for disk.
// Every byte goes through the exported C surface and back into the trampolines.

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use anyhow::Result;
use cimpl_stream::{ErrorCode, HostStream, SeekMode, StreamError};

#[test]
fn abc_scenario_over_cursor() -> Result<()> {
    let mut stream = HostStream::new(Cursor::new(Vec::new()))?;

    assert_eq!(stream.write(b"abc")?, 3);
    assert_eq!(stream.seek(0, SeekMode::Start)?, 0);
    assert_eq!(stream.read(10)?, b"abc");
    assert!(stream.read(10)?.is_empty());

    Ok(())
}

#[test]
fn std_io_copy_through_two_bridges() -> Result<()> {
    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();

    let mut src_file = tempfile::tempfile()?;
    src_file.write_all(&payload)?;
    src_file.rewind()?;

    let mut reader = HostStream::new(src_file)?;
    let mut writer = HostStream::new(tempfile::tempfile()?)?;

    let copied = io::copy(&mut reader, &mut writer)?;
    assert_eq!(copied, payload.len() as u64);
    Write::flush(&mut writer)?;

    let mut dst_file = writer.into_inner()?;
    dst_file.rewind()?;
    let mut back = Vec::new();
    dst_file.read_to_end(&mut back)?;
    assert_eq!(back, payload);

    Ok(())
}

#[test]
fn named_tempfile_window() -> Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(b"0123456789abcdef")?;
    file.flush()?;

    let handle = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(file.path())?;
    let mut stream = HostStream::new(handle)?;

    assert_eq!(stream.seek(0, SeekMode::End)?, 16);
    assert_eq!(stream.seek(-6, SeekMode::End)?, 10);
    assert_eq!(stream.read(3)?, b"abc");
    assert_eq!(stream.tell()?, 13);
    assert_eq!(stream.tell()?, 13);

    Ok(())
}

#[test]
fn seek_trait_matches_inherent_seek() -> Result<()> {
    let mut stream = HostStream::new(Cursor::new(b"hello world".to_vec()))?;

    assert_eq!(Seek::seek(&mut stream, SeekFrom::Start(6))?, 6);
    let mut word = String::new();
    Read::read_to_string(&mut stream, &mut word)?;
    assert_eq!(word, "world");

    assert_eq!(Seek::seek(&mut stream, SeekFrom::Current(-5))?, 6);
    assert_eq!(stream.seek(-6, SeekMode::Current)?, 0);

    Ok(())
}

#[test]
fn errors_keep_their_category_through_io() {
    let mut stream = HostStream::new(Cursor::new(Vec::<u8>::new())).unwrap();

    let err = Seek::seek(&mut stream, SeekFrom::Current(-1)).unwrap_err();
    let typed = StreamError::from(err);
    assert_eq!(typed.code(), ErrorCode::IoOperation);

    stream.close().unwrap();
    let err = Read::read(&mut stream, &mut [0u8; 1]).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    assert_eq!(StreamError::from(err).code(), ErrorCode::InvalidHandle);
}

struct ShortWriter {
    sink: Cursor<Vec<u8>>,
    max_chunk: usize,
}

impl Read for ShortWriter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.sink.read(buf)
    }
}

impl Write for ShortWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = buf.len().min(self.max_chunk);
        self.sink.write(&buf[..n])
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for ShortWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.sink.seek(pos)
    }
}

#[test]
fn short_writes_are_not_errors() -> Result<()> {
    let mut stream = HostStream::new(ShortWriter {
        sink: Cursor::new(Vec::new()),
        max_chunk: 4,
    })?;

    assert_eq!(stream.write(b"abcdefgh")?, 4);
    // write_all retries the remainder
    Write::write_all(&mut stream, b"efgh")?;
    assert_eq!(stream.get_ref().sink.get_ref(), b"abcdefgh");

    Ok(())
}

#[test]
fn streams_on_separate_threads_keep_separate_errors() {
    let workers: Vec<_> = (0..4)
        .map(|i| {
            std::thread::spawn(move || {
                let mut stream = HostStream::new(Cursor::new(vec![i as u8; 32])).unwrap();
                let data = stream.read(8).unwrap();
                assert_eq!(data, vec![i as u8; 8]);
                assert!(stream.seek(-100, SeekMode::Current).is_err());
                assert_eq!(StreamError::last_code(), 0);
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
}
