use std::io::SeekFrom;

use threaded_fileio::ReadSpec;

use crate::assert_io_err;
use crate::common::context::TestContext;

#[tokio::test]
async fn seek_discards_read_ahead() {
    let ctx = TestContext::new();
    ctx.write_file("digits.txt", b"0123456789");
    let req = ctx.request();
    let file = req.open(ctx.path("digits.txt"), "r").unwrap();

    let head = file.read(ReadSpec::Chunk(3)).await.unwrap().unwrap();
    assert_eq!(&head[..], b"012");
    assert_eq!(file.status().buffered_read, 7);

    assert_eq!(file.seek(SeekFrom::Start(0)).await.unwrap(), 0);
    assert_eq!(file.status().buffered_read, 0);

    let again = file.read(ReadSpec::Chunk(3)).await.unwrap().unwrap();
    assert_eq!(&again[..], b"012");
}

#[tokio::test]
async fn relative_seek_uses_logical_offset() {
    let ctx = TestContext::new();
    ctx.write_file("digits.txt", b"0123456789");
    let req = ctx.request();
    let file = req.open(ctx.path("digits.txt"), "r").unwrap();

    file.read(ReadSpec::Chunk(3)).await.unwrap();
    // The descriptor already sits at 10 because of the look-ahead.
    assert_eq!(file.seek(SeekFrom::Current(2)).await.unwrap(), 5);

    let data = file.read(ReadSpec::Chunk(2)).await.unwrap().unwrap();
    assert_eq!(&data[..], b"56");
    assert_eq!(file.seek(SeekFrom::Current(0)).await.unwrap(), 7);
}

#[tokio::test]
async fn seek_from_end() {
    let ctx = TestContext::new();
    ctx.write_file("end.txt", b"abcdef");
    let req = ctx.request();
    let file = req.open(ctx.path("end.txt"), "r").unwrap();

    assert_eq!(file.seek(SeekFrom::End(-2)).await.unwrap(), 4);
    let tail = file.read(ReadSpec::All).await.unwrap().unwrap();
    assert_eq!(&tail[..], b"ef");
}

#[tokio::test]
async fn seek_with_cached_writes_flushes_first() {
    let ctx = TestContext::new();
    let req = ctx.request();
    let file = req.open(ctx.path("w+.txt"), "w+").unwrap();

    file.write("hello\n").await.unwrap();
    file.write("world\n").await.unwrap();
    assert_eq!(ctx.submitted(), 0);

    assert_eq!(file.seek(SeekFrom::Current(0)).await.unwrap(), 12);
    assert_eq!(ctx.submitted(), 1);
    assert_eq!(ctx.read_file("w+.txt"), b"hello\nworld\n");

    assert_eq!(file.seek(SeekFrom::Start(0)).await.unwrap(), 0);
    let line = file.read(ReadSpec::Line).await.unwrap().unwrap();
    assert_eq!(&line[..], b"hello");
}

#[tokio::test]
async fn seek_before_start_fails_and_keeps_position() {
    let ctx = TestContext::new();
    ctx.write_file("neg.txt", b"abc");
    let req = ctx.request();
    let file = req.open(ctx.path("neg.txt"), "r").unwrap();

    file.read(ReadSpec::Chunk(1)).await.unwrap();
    assert_io_err!(file.seek(SeekFrom::Current(-5)).await, "invalid argument");
    assert_eq!(file.status().last_error, libc::EINVAL);
    assert_eq!(file.offset(), 1);

    let rest = file.read(ReadSpec::All).await.unwrap().unwrap();
    assert_eq!(&rest[..], b"bc");
}

#[tokio::test]
async fn write_after_read_lands_at_logical_offset() {
    let ctx = TestContext::new();
    ctx.write_file("patch.txt", b"abcdef");
    let req = ctx.request();
    let file = req.open(ctx.path("patch.txt"), "r+").unwrap();

    let head = file.read(ReadSpec::Chunk(2)).await.unwrap().unwrap();
    assert_eq!(&head[..], b"ab");

    file.write("XY").await.unwrap();
    assert_eq!(file.status().buffered_read, 0);
    file.close().await.unwrap();

    assert_eq!(ctx.read_file("patch.txt"), b"abXYef");
}
