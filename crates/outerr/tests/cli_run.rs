#![cfg(all(target_os = "linux", feature = "cli"))]

use std::io::Cursor;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

use outerr::frame::{Frame, FrameReader, Stream};

fn out_err(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_out-err"))
        .args(["--log-level", "error"])
        .args(args)
        .stdin(Stdio::null())
        .output()
        .expect("out-err should start")
}

fn frames(wire: &[u8]) -> Vec<Frame> {
    FrameReader::new(Cursor::new(wire.to_vec()))
        .map(|frame| frame.expect("combined stream should decode"))
        .collect()
}

fn joined(frames: &[Frame], stream: Stream) -> Vec<u8> {
    frames
        .iter()
        .filter(|f| f.stream == stream)
        .flat_map(|f| f.payload.iter().copied())
        .collect()
}

fn unique_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "outerr-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ))
}

#[test]
fn exit_code_is_propagated() {
    let out = out_err(&["sh", "-c", "exit 7"]);
    assert_eq!(out.status.code(), Some(7));
    assert!(frames(&out.stdout).is_empty());
}

#[test]
fn terminating_signal_is_propagated() {
    let out = out_err(&["sh", "-c", "kill -TERM $$"]);
    assert_eq!(out.status.code(), None);
    assert_eq!(out.status.signal(), Some(libc::SIGTERM));
}

#[test]
fn interleaving_is_preserved() {
    let out = out_err(&["sh", "-c", "echo a; echo b >&2; echo c; echo d >&2"]);
    assert!(out.status.success());

    let summary: Vec<(Stream, Vec<u8>)> = frames(&out.stdout)
        .into_iter()
        .map(|f| (f.stream, f.payload.to_vec()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (Stream::Out, b"a\n".to_vec()),
            (Stream::Err, b"b\n".to_vec()),
            (Stream::Out, b"c\n".to_vec()),
            (Stream::Err, b"d\n".to_vec()),
        ]
    );
}

#[test]
fn last_write_before_exit_is_drained() {
    for _ in 0..20 {
        let out = out_err(&["sh", "-c", "printf last; exit 3"]);
        assert_eq!(out.status.code(), Some(3));
        assert_eq!(frames(&out.stdout), vec![Frame::new(Stream::Out, &b"last"[..])]);
    }
}

#[test]
fn output_file_receives_the_stream() {
    let path = unique_path("output");
    let path_arg = path.to_str().expect("temp path should be utf-8");

    let out = out_err(&["-o", path_arg, "sh", "-c", "echo to-file; echo err >&2"]);
    assert!(out.status.success());
    assert!(out.stdout.is_empty());

    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
    let wire = std::fs::read(&path).unwrap();
    let decoded = frames(&wire);
    assert_eq!(joined(&decoded, Stream::Out), b"to-file\n");
    assert_eq!(joined(&decoded, Stream::Err), b"err\n");
    let _ = std::fs::remove_file(&path);
}

#[test]
fn command_flags_reach_the_command() {
    let out = out_err(&["printf", "%s-%s", "-o", "-x"]);
    assert!(out.status.success());
    assert_eq!(joined(&frames(&out.stdout), Stream::Out), b"-o--x");
}

#[test]
fn exec_failure_is_reported_in_the_stream() {
    let out = out_err(&["/nonexistent/outerr-command"]);
    assert_eq!(out.status.code(), Some(1));

    let err = String::from_utf8(joined(&frames(&out.stdout), Stream::Err)).unwrap();
    assert!(
        err.starts_with("out-err: Failed to run '/nonexistent/outerr-command': "),
        "unexpected message: {err:?}"
    );
}

#[test]
fn unwritable_output_fails_before_running() {
    let marker = unique_path("never-created");
    let marker_arg = marker.to_str().unwrap().to_string();
    let out = out_err(&[
        "-o",
        "/nonexistent-outerr-dir/out.bin",
        "touch",
        &marker_arg,
    ]);

    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.starts_with("out-err: /nonexistent-outerr-dir/out.bin: "));
    assert!(!marker.exists());
}

#[test]
fn missing_command_is_a_usage_error() {
    let out = out_err(&[]);
    assert!(!out.status.success());
    assert!(out.stdout.is_empty());
}
