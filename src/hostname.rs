//! Canonical hostname via gethostname(2) and getaddrinfo(3)
use std::ffi::{CStr, CString};
use std::io;
use std::ptr;

use crate::constants::HOSTNAME_BUFFER_SIZE;
use crate::error::{HostInfoError, Result};

/// Resolve the local hostname to its canonical (fully qualified) name.
pub fn read_canonical_hostname() -> Result<String> {
    let short = local_hostname().map_err(|err| {
        HostInfoError::HostnameLookup(format!("gethostname: {err}"))
    })?;
    canonical_name(&short)
}

/// Short hostname as reported by the kernel.
fn local_hostname() -> io::Result<CString> {
    let mut buf = vec![0u8; HOSTNAME_BUFFER_SIZE];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    // Truncated names are not guaranteed to be NUL terminated
    let len = buf.iter().position(|&b| b == 0).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "hostname not terminated")
    })?;
    buf.truncate(len);
    CString::new(buf).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

/// Owns the list returned by getaddrinfo and frees it on drop.
struct AddrInfoList(*mut libc::addrinfo);

impl Drop for AddrInfoList {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { libc::freeaddrinfo(self.0) };
        }
    }
}

/// Look `host` up with AI_CANONNAME and return the first canonical name.
fn canonical_name(host: &CStr) -> Result<String> {
    let mut hints: libc::addrinfo = unsafe { std::mem::zeroed() };
    hints.ai_family = libc::AF_UNSPEC;
    hints.ai_socktype = libc::SOCK_STREAM;
    hints.ai_flags = libc::AI_CANONNAME;

    let mut res: *mut libc::addrinfo = ptr::null_mut();
    let rc = unsafe { libc::getaddrinfo(host.as_ptr(), ptr::null(), &hints, &mut res) };
    let list = AddrInfoList(res);
    if rc != 0 {
        let reason = unsafe { CStr::from_ptr(libc::gai_strerror(rc)) };
        return Err(HostInfoError::HostnameLookup(format!(
            "{}: {}",
            host.to_string_lossy(),
            reason.to_string_lossy()
        )));
    }

    if list.0.is_null() {
        return Err(HostInfoError::HostnameLookup(format!(
            "{}: no addresses",
            host.to_string_lossy()
        )));
    }

    let canon = unsafe { (*list.0).ai_canonname };
    if canon.is_null() {
        return Err(HostInfoError::HostnameLookup(format!(
            "{}: no canonical name",
            host.to_string_lossy()
        )));
    }

    Ok(unsafe { CStr::from_ptr(canon) }.to_string_lossy().into_owned())
}
