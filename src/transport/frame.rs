//! Length-prefixed frames with descriptor passing
//!
//! A frame is a little-endian `u32` length followed by a bincode payload.
//! Descriptors ride along as `SCM_RIGHTS` on the first byte of the frame.

use std::{
    io::{IoSlice, IoSliceMut, Read, Write},
    os::{
        fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
        unix::net::UnixStream,
    },
};

use nix::sys::socket::{recvmsg, sendmsg, ControlMessage, ControlMessageOwned, MsgFlags};
use serde::{de::DeserializeOwned, Serialize};

use crate::config::MAX_FRAME_SIZE;
use crate::error::{AudioError, Result};

const HEADER_SIZE: usize = 4;

/// Most descriptors one frame carries
pub const MAX_FDS_PER_FRAME: usize = 2;

/// Serialize `message` and send it with `fds`
pub fn send_frame<T: Serialize>(stream: &UnixStream, message: &T, fds: &[RawFd]) -> Result<()> {
    let payload = bincode::serialize(message)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(AudioError::out_of_range(
            "frame_size",
            payload.len() as i64,
            0,
            MAX_FRAME_SIZE as i64,
        ));
    }
    let header = (payload.len() as u32).to_le_bytes();
    let iov = [IoSlice::new(&header), IoSlice::new(&payload)];

    let rights = [ControlMessage::ScmRights(fds)];
    let cmsgs: &[ControlMessage] = if fds.is_empty() { &[] } else { &rights };
    let sent = sendmsg::<()>(stream.as_raw_fd(), &iov, cmsgs, MsgFlags::empty(), None)?;

    // The descriptors went out with the first chunk; finish the bytes.
    let total = HEADER_SIZE + payload.len();
    if sent < total {
        let mut rest = Vec::with_capacity(total - sent);
        rest.extend_from_slice(&header);
        rest.extend_from_slice(&payload);
        (&*stream).write_all(&rest[sent..])?;
    }
    Ok(())
}

/// Receive one frame. `Ok(None)` means the peer closed the connection.
pub fn recv_frame<T: DeserializeOwned>(stream: &UnixStream) -> Result<Option<(T, Vec<OwnedFd>)>> {
    let mut header = [0u8; HEADER_SIZE];
    let mut cmsg_buffer = nix::cmsg_space!([RawFd; MAX_FDS_PER_FRAME]);

    let (received, fds) = {
        let mut iov = [IoSliceMut::new(&mut header)];
        let message = recvmsg::<()>(
            stream.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buffer),
            MsgFlags::MSG_CMSG_CLOEXEC,
        )?;
        let mut fds = Vec::new();
        for cmsg in message.cmsgs() {
            if let ControlMessageOwned::ScmRights(raw) = cmsg {
                // The kernel installed these descriptors for us.
                fds.extend(raw.into_iter().map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }));
            }
        }
        (message.bytes, fds)
    };

    if received == 0 {
        return Ok(None);
    }
    if received < HEADER_SIZE {
        (&*stream).read_exact(&mut header[received..])?;
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(AudioError::out_of_range("frame_size", len as i64, 0, MAX_FRAME_SIZE as i64));
    }
    let mut payload = vec![0u8; len];
    (&*stream).read_exact(&mut payload)?;
    Ok(Some((bincode::deserialize(&payload)?, fds)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{RegionConfig, SharedMemoryRegion};

    #[test]
    fn test_frame_carries_descriptor() {
        let (a, b) = UnixStream::pair().unwrap();
        let region = SharedMemoryRegion::new(RegionConfig::new("frame_fd", 4096)).unwrap();
        unsafe { *region.as_mut_ptr_unsafe::<u32>() = 77 };

        send_frame(&a, &(1u32, "hello".to_string()), &[region.fd()]).unwrap();
        let ((n, text), mut fds): ((u32, String), _) = recv_frame(&b).unwrap().unwrap();
        assert_eq!((n, text.as_str()), (1, "hello"));
        assert_eq!(fds.len(), 1);

        let peer = SharedMemoryRegion::map_descriptor(crate::memory::RegionDescriptor::new(fds.remove(0), 4096)).unwrap();
        assert_eq!(unsafe { *peer.as_ptr::<u32>() }, 77);
    }

    #[test]
    fn test_closed_peer_reads_as_none() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(a);
        assert!(recv_frame::<u32>(&b).unwrap().is_none());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let (a, b) = UnixStream::pair().unwrap();
        (&a).write_all(&(u32::MAX).to_le_bytes()).unwrap();
        assert!(matches!(recv_frame::<u32>(&b), Err(AudioError::OutOfRange { .. })));
    }
}
