// Linux capture implementation: AF_PACKET raw sockets.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use crate::error::NetoflowError;
use crate::packet::{self, PacketDescriptor};

use super::{ANY_INTERFACE, CaptureOptions};

// ---------------------------------------------------------------------------
// AF_PACKET constants
// ---------------------------------------------------------------------------

const ETH_P_ALL: u16 = 0x0003;
const SOL_PACKET: i32 = 263;
const PACKET_ADD_MEMBERSHIP: i32 = 1;
const PACKET_MR_PROMISC: u16 = 1;

// Classic BPF opcodes
const BPF_LD: u16 = 0x00;
const BPF_H: u16 = 0x08;
const BPF_B: u16 = 0x10;
const BPF_ABS: u16 = 0x20;
const BPF_JMP: u16 = 0x05;
const BPF_JEQ: u16 = 0x10;
const BPF_JSET: u16 = 0x40;
const BPF_RET: u16 = 0x06;
const BPF_K: u16 = 0x00;

// Return value of an accepting filter. The kernel trims the frame to this
// length before MSG_TRUNC reports it, so it must not cap the wire length.
const ACCEPT_WHOLE_FRAME: u32 = u32::MAX;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct sock_filter {
    code: u16,
    jt: u8,
    jf: u8,
    k: u32,
}

#[repr(C)]
struct sock_fprog {
    len: u16,
    filter: *mut sock_filter,
}

#[repr(C)]
struct packet_mreq {
    mr_ifindex: i32,
    mr_type: u16,
    mr_alen: u16,
    mr_address: [u8; 8],
}

/// AF_PACKET capture device.
pub struct AfPacketCapture {
    fd: OwnedFd,
    buffer: Vec<u8>,
    interface: String,
}

pub type PlatformCapture = AfPacketCapture;

impl AfPacketCapture {
    /// Create a new AF_PACKET capture device bound to `interface`.
    ///
    /// `any` binds to every interface.
    pub fn new(interface: &str, options: CaptureOptions) -> Result<Self, NetoflowError> {
        // 1. Create raw socket
        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW,
                i32::from(ETH_P_ALL.to_be()),
            )
        };
        if fd < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EPERM) {
                return Err(permission_error());
            }
            return Err(NetoflowError::CaptureDevice(format!(
                "socket(AF_PACKET) failed: {err}"
            )));
        }
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        // 2. Resolve interface index (0 = all interfaces)
        let if_index = if interface == ANY_INTERFACE {
            log::warn!(
                "Interface {ANY_INTERFACE}: only Ethernet-framed links are decoded; \
                 traffic on tun, wireguard or ppp links is not accounted"
            );
            0
        } else {
            if_nametoindex(interface)?
        };

        // 3. Bind
        let mut sll: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        sll.sll_family = libc::AF_PACKET as u16;
        sll.sll_protocol = ETH_P_ALL.to_be();
        sll.sll_ifindex = if_index as i32;

        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(NetoflowError::CaptureDevice(format!(
                "bind(AF_PACKET, {}) failed: {}",
                interface,
                io::Error::last_os_error()
            )));
        }

        // 4. Kernel-side filter: IPv4 TCP/UDP only
        install_filter(&fd, &traffic_filter_ethernet())?;

        // 5. Read timeout (500ms) so shutdown is noticed
        let timeout = libc::timeval {
            tv_sec: 0,
            tv_usec: 500_000,
        };
        let ret = unsafe {
            libc::setsockopt(
                fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &timeout as *const libc::timeval as *const libc::c_void,
                std::mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            log::warn!(
                "SO_RCVTIMEO failed on {}: {}",
                interface,
                io::Error::last_os_error()
            );
        }

        // 6. Promiscuous mode, only when asked for
        if options.promisc {
            if if_index == 0 {
                log::warn!("--promisc ignored for interface {ANY_INTERFACE}");
            } else {
                enable_promisc(&fd, if_index, interface);
            }
        }

        let buffer = vec![0u8; options.snaplen as usize];

        log::info!(
            "AF_PACKET capture on {} (if_index={}, snaplen={}, promisc={})",
            interface,
            if_index,
            buffer.len(),
            options.promisc
        );

        Ok(Self {
            fd,
            buffer,
            interface: interface.to_string(),
        })
    }

    /// Blocking read of packets from the AF_PACKET socket.
    ///
    /// Decoded descriptors are appended to `out` (which is cleared first).
    /// Returns the number of frames received, decoded or not.
    pub fn read_packets(&mut self, out: &mut Vec<PacketDescriptor>) -> Result<usize, NetoflowError> {
        out.clear();

        // First read: blocking (waits for data or timeout)
        let n = self.recv(0);
        if n < 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::EINTR) => Ok(0),
                _ => Err(NetoflowError::CaptureDevice(format!(
                    "recvfrom on {} failed: {}",
                    self.interface, err
                ))),
            };
        }
        let mut frames = 0usize;
        if n > 0 {
            frames += 1;
            self.decode(n as usize, out);
        }

        // Drain additional pending frames with MSG_DONTWAIT
        loop {
            let n = self.recv(libc::MSG_DONTWAIT);
            if n <= 0 {
                break;
            }
            frames += 1;
            self.decode(n as usize, out);
        }

        Ok(frames)
    }

    /// Returns the interface name this capture is bound to.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    // With MSG_TRUNC the return value is the full frame length, which may
    // exceed the buffer.
    fn recv(&mut self, flags: i32) -> isize {
        unsafe {
            libc::recvfrom(
                self.fd.as_raw_fd(),
                self.buffer.as_mut_ptr() as *mut libc::c_void,
                self.buffer.len(),
                flags | libc::MSG_TRUNC,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        }
    }

    fn decode(&self, frame_len: usize, out: &mut Vec<PacketDescriptor>) {
        let captured = frame_len.min(self.buffer.len());
        let wire_len = u32::try_from(frame_len).unwrap_or(u32::MAX);
        if let Some(pkt) =
            packet::parse_ethernet_frame(&self.buffer[..captured], wire_len, packet::now_micros())
        {
            out.push(pkt);
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Check that we have raw socket access.
pub fn check_capture_access() -> Result<(), NetoflowError> {
    // Root always has access
    if unsafe { libc::getuid() } == 0 {
        return Ok(());
    }

    // Without root, CAP_NET_RAW is enough; probe with a throwaway socket.
    let fd = unsafe {
        libc::socket(
            libc::AF_PACKET,
            libc::SOCK_RAW,
            i32::from(ETH_P_ALL.to_be()),
        )
    };
    if fd >= 0 {
        unsafe { libc::close(fd) };
        return Ok(());
    }

    Err(permission_error())
}

/// Open one capture device per interface.
///
/// An empty list captures on every interface. Interfaces that fail to open
/// are skipped with a warning; it is an error only if none open.
pub fn open_capture_devices(
    interfaces: &[String],
    options: CaptureOptions,
) -> Result<Vec<PlatformCapture>, NetoflowError> {
    if interfaces.is_empty() {
        return Ok(vec![AfPacketCapture::new(ANY_INTERFACE, options)?]);
    }

    let mut captures = Vec::new();
    let mut last_err = None;
    for iface in interfaces {
        match AfPacketCapture::new(iface, options) {
            Ok(cap) => captures.push(cap),
            Err(e) => {
                log::warn!("Skipping interface {}: {}", iface, e);
                last_err = Some(e);
            }
        }
    }

    match (captures.is_empty(), last_err) {
        (true, Some(e)) => Err(e),
        _ => Ok(captures),
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn permission_error() -> NetoflowError {
    NetoflowError::InsufficientPermission(
        "netoflow requires raw socket access. Either:\n  \
         1. Run with sudo: sudo netoflow capture ...\n  \
         2. Grant the capability: sudo setcap cap_net_raw+ep $(which netoflow)"
            .to_string(),
    )
}

fn if_nametoindex(name: &str) -> Result<u32, NetoflowError> {
    let c_name = std::ffi::CString::new(name)
        .map_err(|_| NetoflowError::CaptureDevice("invalid interface name".to_string()))?;
    let idx = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if idx == 0 {
        return Err(NetoflowError::CaptureDevice(format!(
            "if_nametoindex({}) failed: {}",
            name,
            io::Error::last_os_error()
        )));
    }
    Ok(idx)
}

fn enable_promisc(fd: &OwnedFd, if_index: u32, interface: &str) {
    let mreq = packet_mreq {
        mr_ifindex: if_index as i32,
        mr_type: PACKET_MR_PROMISC,
        mr_alen: 0,
        mr_address: [0u8; 8],
    };
    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            SOL_PACKET,
            PACKET_ADD_MEMBERSHIP,
            &mreq as *const packet_mreq as *const libc::c_void,
            std::mem::size_of::<packet_mreq>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        log::warn!(
            "PACKET_MR_PROMISC failed on {}: {} (continuing without promiscuous mode)",
            interface,
            io::Error::last_os_error()
        );
    }
}

fn install_filter(fd: &OwnedFd, filter: &[sock_filter]) -> Result<(), NetoflowError> {
    let mut insns = filter.to_vec();
    let prog = sock_fprog {
        len: insns.len() as u16,
        filter: insns.as_mut_ptr(),
    };

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_ATTACH_FILTER,
            &prog as *const sock_fprog as *const libc::c_void,
            std::mem::size_of::<sock_fprog>() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(NetoflowError::CaptureDevice(format!(
            "SO_ATTACH_FILTER failed: {}",
            io::Error::last_os_error()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// BPF filter program (Ethernet framing)
// ---------------------------------------------------------------------------

fn insn(code: u16, jt: u8, jf: u8, k: u32) -> sock_filter {
    sock_filter { code, jt, jf, k }
}

/// Accept IPv4 TCP/UDP that is not a non-first fragment; reject the rest.
fn traffic_filter_ethernet() -> Vec<sock_filter> {
    vec![
        // 0: Load EtherType at offset 12
        insn(BPF_LD | BPF_H | BPF_ABS, 0, 0, 12),
        // 1: IPv4 (0x0800)? else reject
        insn(BPF_JMP | BPF_JEQ | BPF_K, 0, 6, 0x0800),
        // 2: Load flags/fragment offset at 20 (14 + 6)
        insn(BPF_LD | BPF_H | BPF_ABS, 0, 0, 20),
        // 3: Fragment offset set? reject
        insn(BPF_JMP | BPF_JSET | BPF_K, 4, 0, 0x1FFF),
        // 4: Load IPv4 protocol at 23 (14 + 9)
        insn(BPF_LD | BPF_B | BPF_ABS, 0, 0, 23),
        // 5: TCP (6)? accept
        insn(BPF_JMP | BPF_JEQ | BPF_K, 1, 0, 6),
        // 6: UDP (17)? accept, else reject
        insn(BPF_JMP | BPF_JEQ | BPF_K, 0, 1, 17),
        // 7: Accept whole frame
        insn(BPF_RET | BPF_K, 0, 0, ACCEPT_WHOLE_FRAME),
        // 8: Reject
        insn(BPF_RET | BPF_K, 0, 0, 0),
    ]
}
