use heapless::Vec;

/// Copy of the last thing payload handed to the transport.
///
/// The bytes stay around after a successful publish so a connection loss
/// detected later can still resend them.
#[derive(Debug, Default)]
pub(crate) struct RetransmitBuffer<const N: usize> {
    payload: Vec<u8, N>,
    requested: bool,
}

impl<const N: usize> RetransmitBuffer<N> {
    pub(crate) fn store(&mut self, bytes: &[u8]) {
        self.payload.clear();
        if self.payload.extend_from_slice(bytes).is_err() {
            error!("payload of {} bytes exceeds the retransmit buffer", bytes.len());
        }
        self.requested = false;
    }

    /// Marks the stored payload for resending on the next connected tick.
    pub(crate) fn request(&mut self) {
        if !self.payload.is_empty() {
            self.requested = true;
        }
    }

    pub(crate) fn pending(&self) -> Option<&[u8]> {
        self.requested.then_some(self.payload.as_slice())
    }

    pub(crate) fn settle(&mut self) {
        self.requested = false;
    }

    pub(crate) fn clear(&mut self) {
        self.payload.clear();
        self.requested = false;
    }
}
