use std::sync::Arc;

use futures::poll;
use threaded_fileio::{
    IoConfig, ReadSpec, RequestContext, SessionState, ThreadPool, ThreadPoolConfig,
    ThreadPoolRegistry,
};

use crate::assert_io_err;
use crate::common::context::TestContext;

const BIG_WRITE: usize = 16 * 1024 * 1024;

#[tokio::test]
async fn close_is_final() {
    let ctx = TestContext::new();
    let req = ctx.request();
    let file = req.open(ctx.path("final.txt"), "w+").unwrap();

    file.write("abc").await.unwrap();
    file.close().await.unwrap();
    assert_eq!(ctx.read_file("final.txt"), b"abc");
    assert_eq!(ctx.submitted(), 1);
    assert_eq!(req.open_sessions(), 0);

    assert_io_err!(file.close().await, "closed");
    assert_io_err!(file.write("x").await, "closed");
    assert_io_err!(file.read(ReadSpec::All).await, "closed");
    assert_io_err!(file.flush(false).await, "closed");
    assert_io_err!(file.seek(std::io::SeekFrom::Start(0)).await, "closed");
    assert_eq!(file.status().state, SessionState::Closed);
}

#[tokio::test]
async fn operations_while_busy_are_rejected() {
    let ctx = TestContext::new();
    let req = ctx.request_with(IoConfig::default().with_write_buffer_size(0));
    let file = req.open(ctx.path("busy.bin"), "w").unwrap();
    let other = file.clone();

    let payload = vec![7u8; BIG_WRITE];
    let mut write = Box::pin(file.write(&payload));
    assert!(poll!(write.as_mut()).is_pending());

    let status = other.status();
    assert_eq!(status.state, SessionState::Writing);
    assert!(!status.closing);
    assert_eq!(req.blocked(), 1);

    assert_io_err!(other.close().await, "io busy writing");
    assert_io_err!(other.write("more").await, "io busy writing");
    assert_io_err!(other.flush(true).await, "io busy writing");
    assert_io_err!(other.seek(std::io::SeekFrom::Start(0)).await, "io busy writing");

    assert_eq!(write.await.unwrap(), BIG_WRITE);
    assert_eq!(req.blocked(), 0);
    assert_eq!(other.status().state, SessionState::Idle);

    other.close().await.unwrap();
    assert_eq!(ctx.read_file("busy.bin").len(), BIG_WRITE);
}

#[tokio::test]
async fn close_while_flushing_reports_busy_flushing() {
    let ctx = TestContext::new();
    let req = ctx.request_with(IoConfig::default().with_write_buffer_size(2 * BIG_WRITE));
    let file = req.open(ctx.path("closing.bin"), "w").unwrap();

    let payload = vec![1u8; BIG_WRITE];
    file.write(&payload).await.unwrap();
    file.write("tail").await.unwrap();
    assert_eq!(file.status().buffered_write, BIG_WRITE + 4);
    assert_eq!(ctx.submitted(), 0);

    let mut close = Box::pin(file.close());
    assert!(poll!(close.as_mut()).is_pending());
    let status = file.status();
    assert_eq!(status.state, SessionState::Flushing);
    assert!(status.closing);

    assert_io_err!(file.close().await, "io busy flushing");

    close.await.unwrap();
    assert_eq!(file.status().state, SessionState::Closed);
    assert_eq!(ctx.read_file("closing.bin").len(), BIG_WRITE + 4);
}

#[tokio::test]
async fn abandoning_an_operation_finalizes_the_session() {
    let ctx = TestContext::new();
    let req = ctx.request_with(IoConfig::default().with_write_buffer_size(0));
    let file = req.open(ctx.path("abandon.bin"), "w").unwrap();

    let payload = vec![3u8; BIG_WRITE];
    {
        let mut write = Box::pin(file.write(&payload));
        assert!(poll!(write.as_mut()).is_pending());
    }

    assert_eq!(req.blocked(), 0);
    assert_eq!(req.open_sessions(), 0);
    assert_eq!(file.status().state, SessionState::Closed);
    assert_io_err!(file.write("x").await, "closed");
}

#[tokio::test]
async fn teardown_discards_cached_writes() {
    let ctx = TestContext::new();
    let req = ctx.request();
    let file = req.open(ctx.path("teardown.txt"), "w").unwrap();

    file.write("never written").await.unwrap();
    req.teardown();

    assert_eq!(file.status().state, SessionState::Closed);
    assert!(ctx.read_file("teardown.txt").is_empty());
    assert_io_err!(file.write("x").await, "closed");
    assert_io_err!(req.open(ctx.path("later.txt"), "w"), "closed");
}

#[tokio::test]
async fn dropped_handle_is_finalized() {
    let ctx = TestContext::new();
    let req = ctx.request();

    let file = req.open(ctx.path("dropped.txt"), "w").unwrap();
    file.write("cached").await.unwrap();
    assert_eq!(req.open_sessions(), 1);

    drop(file);
    assert_eq!(req.open_sessions(), 0);
    assert!(ctx.read_file("dropped.txt").is_empty());
}

#[tokio::test]
async fn dropping_request_context_closes_sessions() {
    let ctx = TestContext::new();
    let file = {
        let req = ctx.request();
        req.open(ctx.path("scoped.txt"), "w").unwrap()
    };

    assert_eq!(file.status().state, SessionState::Closed);
}

#[tokio::test]
async fn rejected_post_reports_task_post_failed() {
    let ctx = TestContext::new();
    let mut registry = ThreadPoolRegistry::new();
    let pool = registry.add(ThreadPool::new(&ThreadPoolConfig::new("default", 1, 4)).unwrap());
    let req = RequestContext::new(
        IoConfig::default().with_write_buffer_size(0),
        Arc::new(registry),
    );
    let file = req.open(ctx.path("post.txt"), "w").unwrap();

    pool.shutdown();
    assert_io_err!(file.write("lost").await, "task post failed");
    assert_eq!(file.offset(), 0);
    assert_eq!(file.status().state, SessionState::Idle);
    assert_eq!(pool.stats().rejected, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sessions_on_many_tasks() {
    let ctx = TestContext::new();
    let req = Arc::new(ctx.request_with(IoConfig::default().with_write_buffer_size(64)));

    let mut joins = Vec::new();
    for i in 0..8 {
        let file = req.open(ctx.path(&format!("task-{}.txt", i)), "w+").unwrap();
        joins.push(tokio::spawn(async move {
            for n in 0..100 {
                file.write(format!("{}:{}\n", i, n)).await?;
            }
            file.seek(std::io::SeekFrom::Start(0)).await?;
            let mut count = 0;
            while file.read(ReadSpec::Line).await?.is_some() {
                count += 1;
            }
            file.close().await?;
            Ok::<_, threaded_fileio::IoError>(count)
        }));
    }

    for join in joins {
        assert_eq!(join.await.unwrap().unwrap(), 100);
    }
    assert_eq!(req.open_sessions(), 0);
    assert_eq!(req.blocked(), 0);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn close_reports_failed_final_write_and_still_closes() {
    let ctx = TestContext::new();
    let req = ctx.request();
    let file = req.open("/dev/full", "w").unwrap();

    file.write("never fits").await.unwrap();
    assert_io_err!(file.close().await, "no space left on device");

    let status = file.status();
    assert_eq!(status.state, SessionState::Closed);
    assert_eq!(status.last_error, libc::ENOSPC);
    assert_eq!(req.open_sessions(), 0);
    assert_io_err!(file.close().await, "closed");
}
