// cargo test --test writer -- --nocapture

mod util;
use util::*;

use std::sync::Once;

use proio_stream::{
    read_frame, FrameRead, Header, Reader, ReaderState, Writer, DEFAULT_MAX_PAYLOAD_SIZE,
};

static INIT: Once = Once::new();

fn random_payloads(count: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|_| {
            let len = fastrand::usize(0..512);
            (0..len).map(|_| fastrand::u8(..)).collect()
        })
        .collect()
}

#[test]
fn loopback() -> anyhow::Result<()> {
    INIT.call_once(env_logger::init);
    fastrand::seed(42);

    let path = temp_file(&format!("proio-loopback-{}", timestamp()))?;
    let payloads = random_payloads(20);

    let mut writer = Writer::create(&path)?;
    for payload in &payloads {
        writer.push(payload)?;
    }
    writer.flush()?;
    assert_eq!(writer.frames(), 20);
    assert_eq!(writer.offset(), std::fs::metadata(&path)?.len());

    let mut reader = Reader::open(&path)?;
    assert_eq!(reader.metadata()?, Header::default());
    for (i, expected) in payloads.iter().enumerate() {
        let event = reader.next()?.unwrap();
        assert_eq!(event.payload(), expected.as_slice());
        assert_eq!(event.index(), i as u64);
    }
    assert!(reader.next()?.is_none());
    assert_eq!(reader.frames(), 21);
    Ok(())
}

#[test]
fn gzip_loopback() -> anyhow::Result<()> {
    INIT.call_once(env_logger::init);
    fastrand::seed(1312);

    let path = temp_file(&format!("proio-gzip-{}.gz", timestamp()))?;
    let payloads = random_payloads(10);

    let mut writer = Writer::create_gzip(&path)?;
    for payload in &payloads {
        writer.push(payload)?;
    }
    let written = writer.offset();
    writer.finish()?;

    let bytes = std::fs::read(&path)?;
    assert!(bytes.starts_with(&[0x1F, 0x8B]));

    let mut reader = Reader::open_gzip(&path)?;
    for expected in &payloads {
        assert_eq!(reader.next()?.unwrap().payload(), expected.as_slice());
    }
    assert!(reader.next()?.is_none());
    // offsets count decompressed bytes, so both sides agree
    assert_eq!(reader.offset(), written);

    // a gzip container with no events still carries its header frame
    let path = temp_file(&format!("proio-gzip-empty-{}.gz", timestamp()))?;
    let writer = Writer::create_gzip(&path)?;
    writer.finish()?;
    let mut reader = Reader::open_gzip(&path)?;
    assert!(reader.metadata()?.is_empty());
    assert!(reader.next()?.is_none());
    Ok(())
}

#[test]
fn fd_loopback() -> anyhow::Result<()> {
    INIT.call_once(env_logger::init);

    let path = temp_file(&format!("proio-fd-{}", timestamp()))?;
    let mut writer = Writer::create(&path)?;
    writer.push(b"uno")?;
    writer.push(b"dos")?;
    writer.flush()?;

    let file = std::fs::File::open(&path)?;
    let fd = std::os::fd::OwnedFd::from(file);
    let mut reader = Reader::from_fd(fd, false);
    assert_eq!(reader.next()?.unwrap().payload(), b"uno");
    assert_eq!(reader.next()?.unwrap().payload(), b"dos");
    assert!(reader.next()?.is_none());

    let path = temp_file(&format!("proio-fd-{}.gz", timestamp()))?;
    let mut writer = Writer::create_gzip(&path)?;
    writer.push(b"tres")?;
    writer.finish()?;

    let file = std::fs::File::open(&path)?;
    let fd = std::os::fd::OwnedFd::from(file);
    let mut reader = Reader::from_fd(fd, true);
    assert_eq!(reader.next()?.unwrap().payload(), b"tres");
    assert!(reader.next()?.is_none());
    Ok(())
}

#[test]
fn custom_metadata() -> anyhow::Result<()> {
    INIT.call_once(env_logger::init);

    let mut header = Header::new();
    header
        .insert("experiment", "dune")
        .insert("blob", vec![0u8, 255]);

    let mut writer = Writer::with_header(Vec::new(), header.clone());
    writer.push(b"evt-0")?;
    writer.push(b"evt-1")?;
    let bytes = writer.into_inner()?;

    let mut reader = Reader::new(MemSource::new(bytes));
    assert_eq!(reader.metadata()?, header);
    assert_eq!(reader.next()?.unwrap().payload(), b"evt-0");
    assert_eq!(reader.next()?.unwrap().payload(), b"evt-1");
    assert!(reader.next()?.is_none());
    Ok(())
}

#[test]
fn empty_stream_has_header() -> anyhow::Result<()> {
    INIT.call_once(env_logger::init);

    let writer = Writer::new(Vec::new());
    let bytes = writer.into_inner()?;

    // the sink holds exactly one frame: the default header
    let mut slice = &bytes[..];
    match read_frame(&mut slice, DEFAULT_MAX_PAYLOAD_SIZE)? {
        FrameRead::Frame(payload) => assert_eq!(payload, Header::default().encode()),
        other => panic!("expected the header frame, got {other:?}"),
    }
    assert!(slice.is_empty());

    let mut reader = Reader::new(MemSource::new(bytes));
    assert!(reader.metadata()?.is_empty());
    assert!(reader.next()?.is_none());
    assert_eq!(reader.state(), ReaderState::Exhausted);
    Ok(())
}
