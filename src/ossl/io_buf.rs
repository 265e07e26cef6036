use std::collections::VecDeque;
use std::io;

/// Datagram-preserving in-memory BIO for OpenSSL.
///
/// Every `write` from OpenSSL is one outgoing datagram. Reads hand out the
/// single incoming datagram and then report `WouldBlock`.
#[derive(Debug, Default)]
pub(crate) struct IoBuffer {
    incoming: Option<Vec<u8>>,
    outgoing: VecDeque<Vec<u8>>,
}

impl IoBuffer {
    pub fn set_incoming(&mut self, datagram: &[u8]) {
        if self.incoming.is_some() {
            trace!("Replacing unread incoming datagram");
        }
        self.incoming = Some(datagram.to_vec());
    }

    pub fn clear_incoming(&mut self) {
        self.incoming = None;
    }

    pub fn pop_outgoing(&mut self) -> Option<Vec<u8>> {
        self.outgoing.pop_front()
    }
}

impl io::Read for IoBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(datagram) = self.incoming.take() else {
            return Err(io::ErrorKind::WouldBlock.into());
        };

        let n = datagram.len().min(buf.len());
        if n < datagram.len() {
            warn!("Truncated incoming datagram {} > {}", datagram.len(), n);
        }
        buf[..n].copy_from_slice(&datagram[..n]);

        Ok(n)
    }
}

impl io::Write for IoBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outgoing.push_back(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
