use futures::TryStreamExt;
use threaded_fileio::{IoConfig, ReadSpec};

use crate::common::context::TestContext;
use crate::{assert_io_err, assert_line};

#[tokio::test]
async fn line_filter_drops_cr_and_keeps_final_partial_line() {
    let ctx = TestContext::new();
    ctx.write_file("crlf.txt", b"abc\r\ndef");
    let req = ctx.request();
    let file = req.open(ctx.path("crlf.txt"), "r").unwrap();

    assert_line!(file, b"abc");
    assert_line!(file, b"def");
    assert_line!(file, None);
    assert_line!(file, None);
}

#[tokio::test]
async fn trailing_newline_yields_no_extra_line() {
    let ctx = TestContext::new();
    ctx.write_file("lines.txt", b"one\ntwo\n");
    let req = ctx.request();
    let file = req.open(ctx.path("lines.txt"), "r").unwrap();

    assert_line!(file, b"one");
    assert_line!(file, b"two");
    assert_line!(file, None);
}

#[tokio::test]
async fn empty_line_is_not_end_of_stream() {
    let ctx = TestContext::new();
    ctx.write_file("gaps.txt", b"a\n\nb");
    let req = ctx.request();
    let file = req.open(ctx.path("gaps.txt"), "r").unwrap();

    assert_line!(file, b"a");
    assert_line!(file, b"");
    assert_line!(file, b"b");
    assert_line!(file, None);
}

#[tokio::test]
async fn chunk_larger_than_file_returns_remaining_bytes() {
    let ctx = TestContext::new();
    ctx.write_file("short.txt", b"12345");
    let req = ctx.request();
    let file = req.open(ctx.path("short.txt"), "r").unwrap();

    let first = file.read(ReadSpec::Chunk(2)).await.unwrap().unwrap();
    assert_eq!(&first[..], b"12");
    let rest = file.read(ReadSpec::Chunk(10)).await.unwrap().unwrap();
    assert_eq!(&rest[..], b"345");
    assert_eq!(file.read(ReadSpec::Chunk(10)).await.unwrap(), None);
    assert_eq!(file.offset(), 5);
}

#[tokio::test]
async fn zero_chunk_returns_empty_without_io() {
    let ctx = TestContext::new();
    ctx.write_file("zero.txt", b"abc");
    let req = ctx.request();
    let file = req.open(ctx.path("zero.txt"), "r").unwrap();

    let data = file.read(ReadSpec::Chunk(0)).await.unwrap().unwrap();
    assert!(data.is_empty());
    assert_eq!(ctx.submitted(), 0);
}

#[tokio::test]
async fn small_read_buffers_are_refilled() {
    let ctx = TestContext::new();
    let content: Vec<u8> = (0..100u8).map(|i| b'a' + i % 26).collect();
    ctx.write_file("big.txt", &content);
    let req = ctx.request_with(IoConfig::default().with_read_buffer_size(8));
    let file = req.open(ctx.path("big.txt"), "r").unwrap();

    let chunk = file.read(ReadSpec::Chunk(30)).await.unwrap().unwrap();
    assert_eq!(&chunk[..], &content[..30]);

    let rest = file.read(ReadSpec::All).await.unwrap().unwrap();
    assert_eq!(&rest[..], &content[30..]);
    assert_eq!(file.read(ReadSpec::All).await.unwrap(), None);
}

#[tokio::test]
async fn line_spanning_several_buffers() {
    let ctx = TestContext::new();
    ctx.write_file("long.txt", b"a fairly long first line\r\nsecond\n");
    let req = ctx.request_with(IoConfig::default().with_read_buffer_size(5));
    let file = req.open(ctx.path("long.txt"), "r").unwrap();

    assert_line!(file, b"a fairly long first line");
    assert_line!(file, b"second");
    assert_line!(file, None);
}

#[tokio::test]
async fn lines_stream_yields_every_line() {
    let ctx = TestContext::new();
    ctx.write_file("stream.txt", b"alpha\nbeta\r\ngamma");
    let req = ctx.request();
    let file = req.open(ctx.path("stream.txt"), "r").unwrap();

    let lines: Vec<_> = file.lines().try_collect().await.unwrap();
    let lines: Vec<&[u8]> = lines.iter().map(|l| &l[..]).collect();
    assert_eq!(lines, vec![&b"alpha"[..], b"beta", b"gamma"]);
}

#[tokio::test]
async fn read_all_of_empty_file_is_end_of_stream() {
    let ctx = TestContext::new();
    ctx.write_file("nothing.txt", b"");
    let req = ctx.request();
    let file = req.open(ctx.path("nothing.txt"), "r").unwrap();

    assert_eq!(file.read(ReadSpec::All).await.unwrap(), None);
    assert!(file.status().eof);
}

#[tokio::test]
async fn write_only_handle_rejects_reads() {
    let ctx = TestContext::new();
    let req = ctx.request();
    let file = req.open(ctx.path("wo.txt"), "w").unwrap();

    assert_io_err!(file.read(ReadSpec::Line).await, "operation not permitted");
    assert_eq!(file.status().state, threaded_fileio::SessionState::Idle);
}

#[tokio::test]
async fn read_flushes_cached_writes_first() {
    let ctx = TestContext::new();
    ctx.write_file("rw.txt", b"0123456789");
    let req = ctx.request();
    let file = req.open(ctx.path("rw.txt"), "r+").unwrap();

    file.write("ab").await.unwrap();
    assert_eq!(ctx.submitted(), 0);

    let rest = file.read(ReadSpec::All).await.unwrap().unwrap();
    assert_eq!(&rest[..], b"23456789");
    assert_eq!(ctx.read_file("rw.txt"), b"ab23456789");
}
