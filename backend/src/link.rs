use std::fmt;

/// Transmission failure on the pad segment. Never escalated to a fatal
/// error: the control loop must keep running to stay able to process a
/// later abort.
#[derive(Debug)]
pub enum LinkError {
    /// Send buffer full; the attempt counts against the retry budget.
    Busy,
    TooLarge(usize),
    Io(std::io::Error),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Busy => write!(f, "link send buffer full"),
            LinkError::TooLarge(len) => write!(f, "frame too large to send: {len} bytes"),
            LinkError::Io(err) => write!(f, "link io error: {err}"),
        }
    }
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LinkError::Io(err) => Some(err),
            _ => None,
        }
    }
}

// ======================================================================
//  Link Device Trait
// ======================================================================
pub trait LinkDevice: Send {
    /// Non-blocking transmit of one raw frame.
    fn send_frame(&mut self, bytes: &[u8]) -> Result<(), LinkError>;
    /// Non-blocking receive of one raw frame, if any is queued.
    fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, LinkError>;
}

// ======================================================================
//  Real MAC-raw Implementation (AF_PACKET)
// ======================================================================
#[cfg(target_os = "linux")]
mod raw {
    use super::{LinkDevice, LinkError};
    use anyhow::Context;
    use padcontrol_shared::frame::{ETHERTYPE, MAX_FRAME_LEN};
    use std::ffi::CString;
    use std::io;

    /// Raw packet socket bound to one interface and the pad ethertype.
    /// Opening requires CAP_NET_RAW.
    pub struct EthernetLink {
        fd: libc::c_int,
    }

    impl EthernetLink {
        pub fn open(interface: &str) -> anyhow::Result<EthernetLink> {
            let protocol = ETHERTYPE.to_be();
            let fd = unsafe {
                libc::socket(
                    libc::AF_PACKET,
                    libc::SOCK_RAW | libc::SOCK_NONBLOCK,
                    i32::from(protocol),
                )
            };
            if fd < 0 {
                return Err(io::Error::last_os_error())
                    .context("failed to open AF_PACKET socket (CAP_NET_RAW required)");
            }

            let name = CString::new(interface).context("bad interface name")?;
            let ifindex = unsafe { libc::if_nametoindex(name.as_ptr()) };
            if ifindex == 0 {
                let err = io::Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(err).with_context(|| format!("no such interface: {interface}"));
            }

            let mut sll: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
            sll.sll_family = libc::AF_PACKET as libc::sa_family_t;
            sll.sll_protocol = protocol;
            sll.sll_ifindex = ifindex as libc::c_int;
            let rc = unsafe {
                libc::bind(
                    fd,
                    std::ptr::addr_of!(sll).cast(),
                    std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
                )
            };
            if rc != 0 {
                let err = io::Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(err).with_context(|| format!("failed to bind to {interface}"));
            }

            Ok(EthernetLink { fd })
        }
    }

    impl Drop for EthernetLink {
        fn drop(&mut self) {
            unsafe { libc::close(self.fd) };
        }
    }

    impl LinkDevice for EthernetLink {
        fn send_frame(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
            if bytes.len() > MAX_FRAME_LEN {
                return Err(LinkError::TooLarge(bytes.len()));
            }
            let rc = unsafe { libc::send(self.fd, bytes.as_ptr().cast(), bytes.len(), 0) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                return Err(if err.kind() == io::ErrorKind::WouldBlock {
                    LinkError::Busy
                } else {
                    LinkError::Io(err)
                });
            }
            Ok(())
        }

        fn recv_frame(&mut self) -> Result<Option<Vec<u8>>, LinkError> {
            let mut buf = [0u8; MAX_FRAME_LEN + 4];
            let rc = unsafe { libc::recv(self.fd, buf.as_mut_ptr().cast(), buf.len(), 0) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                return if err.kind() == io::ErrorKind::WouldBlock {
                    Ok(None)
                } else {
                    Err(LinkError::Io(err))
                };
            }
            Ok(Some(buf[..rc as usize].to_vec()))
        }
    }
}

#[cfg(target_os = "linux")]
pub use raw::EthernetLink;
