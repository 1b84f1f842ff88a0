/// Asserts that an operation failed with the given caller-visible message.
#[macro_export]
macro_rules! assert_io_err {
    ($expr:expr, $msg:expr) => {
        match $expr {
            Ok(val) => panic!("Expected Err({:?}), got Ok({:?})", $msg, val),
            Err(err) => assert_eq!(err.to_string(), $msg),
        }
    };
}

/// Reads the next line and asserts its content.
#[macro_export]
macro_rules! assert_line {
    ($handle:expr, None) => {
        assert_eq!(
            $handle.read(threaded_fileio::ReadSpec::Line).await.unwrap(),
            None
        )
    };
    ($handle:expr, $line:expr) => {
        assert_eq!(
            $handle
                .read(threaded_fileio::ReadSpec::Line)
                .await
                .unwrap()
                .as_deref(),
            Some(&$line[..])
        )
    };
}
