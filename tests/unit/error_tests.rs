//! Error display formats consumed by logs and API payloads.

use ghostwriter_acp::AcpError;

#[test]
fn display_prefixes_name_the_kind() {
    let cases = [
        (AcpError::Config("bad toml".into()), "config: bad toml"),
        (
            AcpError::BinaryNotFound("cannot find command 'kiro-cli'".into()),
            "binary not found: cannot find command 'kiro-cli'",
        ),
        (
            AcpError::ProcessExited("agent process exited with code 1".into()),
            "process exited: agent process exited with code 1",
        ),
        (
            AcpError::RequestTimeout("'session/prompt' received no response within 60s".into()),
            "request timed out: 'session/prompt' received no response within 60s",
        ),
        (AcpError::Agent("session limit".into()), "agent error: session limit"),
        (AcpError::Disposed("client is disposing".into()), "disposed: client is disposing"),
        (AcpError::Io("pipe closed".into()), "io: pipe closed"),
    ];

    for (error, expected) in cases {
        assert_eq!(error.to_string(), expected);
    }
}

#[test]
fn io_error_converts_with_message() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
    let err: AcpError = io.into();
    assert!(matches!(err, AcpError::Io(ref msg) if msg.contains("pipe closed")));
}
