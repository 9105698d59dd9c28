//! Connecting to an abstract-namespace Unix listener. `std`'s
//! `UnixStream::connect` cannot express a leading-NUL path, so the
//! `socket`/`connect` calls are made directly, mirroring the bind side in
//! `pulsecheck-engine`'s `unix_socket` module.

use std::io;
use std::mem;
use std::os::unix::io::FromRawFd;

pub fn connect_abstract(name: &str) -> io::Result<std::os::unix::net::UnixStream> {
    let name_bytes = name.as_bytes();
    unsafe {
        let fd = libc::socket(libc::AF_UNIX, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut addr: libc::sockaddr_un = mem::zeroed();
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
        let path_slice = std::slice::from_raw_parts_mut(addr.sun_path.as_mut_ptr() as *mut u8, addr.sun_path.len());
        path_slice[1..1 + name_bytes.len()].copy_from_slice(name_bytes);
        let addr_len = (mem::size_of::<libc::sa_family_t>() + 1 + name_bytes.len()) as libc::socklen_t;

        if libc::connect(fd, &addr as *const _ as *const libc::sockaddr, addr_len) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        Ok(std::os::unix::net::UnixStream::from_raw_fd(fd))
    }
}
