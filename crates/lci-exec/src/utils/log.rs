//! Stderr writes usable between `fork()` and `execve()`.
//!
//! Only `libc::write` and stack buffers: no allocation, no locks.
#![cfg_attr(not(target_os = "linux"), allow(dead_code))]

#[cfg(unix)]
fn write_stderr(bytes: &[u8]) {
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            bytes.as_ptr() as *const libc::c_void,
            bytes.len(),
        );
    }
}

#[cfg(not(unix))]
fn write_stderr(bytes: &[u8]) {
    use std::io::Write;

    let _ = std::io::stderr().write_all(bytes);
}

pub fn pre_exec_log(msg: &[u8]) {
    write_stderr(msg);
}

/// Writes `errno=<n>\n`.
pub fn pre_exec_log_errno(errno: i32) {
    let mut buf = [0u8; 24];
    let mut end = buf.len();
    end -= 1;
    buf[end] = b'\n';

    let mut n = errno.unsigned_abs();
    loop {
        end -= 1;
        buf[end] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    if errno < 0 {
        end -= 1;
        buf[end] = b'-';
    }
    write_stderr(b"errno=");
    write_stderr(&buf[end..]);
}
