//! Extension ABI: a small capability each negotiated extension implements.
//!
//! The connection state machine and frame codec never know what an
//! extension does; they only call `encode`/`decode` in the order
//! negotiation fixed (forward for outbound frames, reverse for inbound) and
//! check which of `rsv1`/`rsv2`/`rsv3` it claimed so the frame-invariant
//! check doesn't reject bits the extension is allowed to set.

use crate::frame::Frame;
use std::fmt;

/// Capability exposed by a negotiated extension (e.g. permessage-deflate).
/// A concrete deflate implementation is out of scope for this crate; callers
/// that need compression provide their own `Extension` impl.
pub trait Extension: fmt::Debug + Send {
    /// Name as it appears in `Sec-WebSocket-Extensions`.
    fn name(&self) -> &str;

    /// Which reserved bits this extension claims, in `(rsv1, rsv2, rsv3)` order.
    fn reserved_bits(&self) -> (bool, bool, bool);

    /// Transform an outbound frame before it's masked and serialized.
    fn encode(&mut self, frame: Frame) -> crate::error::Result<Frame>;

    /// Transform an inbound frame after unmasking, before invariant checks.
    /// `max_size` lets a decompressing extension enforce the same cap the
    /// frame codec would have enforced on the wire-size payload.
    fn decode(&mut self, frame: Frame, max_size: Option<u64>) -> crate::error::Result<Frame>;
}

/// Applies `encode` across a negotiated extension chain in serialization
/// (forward) order.
pub fn encode_chain(
    extensions: &mut [Box<dyn Extension>],
    mut frame: Frame,
) -> crate::error::Result<Frame> {
    for ext in extensions.iter_mut() {
        frame = ext.encode(frame)?;
    }
    Ok(frame)
}

/// Applies `decode` across a negotiated extension chain in reverse order.
pub fn decode_chain(
    extensions: &mut [Box<dyn Extension>],
    mut frame: Frame,
    max_size: Option<u64>,
) -> crate::error::Result<Frame> {
    for ext in extensions.iter_mut().rev() {
        frame = ext.decode(frame, max_size)?;
    }
    Ok(frame)
}

/// The union of reserved bits claimed by a set of negotiated extensions.
/// Any bit not in this set must be zero on every frame.
pub fn claimed_reserved_bits(extensions: &[Box<dyn Extension>]) -> (bool, bool, bool) {
    extensions.iter().fold((false, false, false), |acc, e| {
        let (r1, r2, r3) = e.reserved_bits();
        (acc.0 || r1, acc.1 || r2, acc.2 || r3)
    })
}
