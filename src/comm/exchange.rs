//! The halo-exchange engine.
//!
//! `communicate` is the blocking composition of `send` followed by `wait`.
//! `send` posts all receives *before* any send to rule out circular-wait
//! deadlock, packs each field's boundary-adjacent interior cells into
//! per-neighbour buffers, issues the non-blocking transfers and returns a
//! [`CommHandle`] aggregating the pending requests. `wait` blocks until
//! every request completes, then unpacks each buffer into the matching
//! guard region in exactly the field order used for packing. That pairing
//! is a correctness invariant: reordering would corrupt data silently.
//!
//! The X protocol is plain nearest-neighbour, skipped at physical edges
//! (`first_x`/`last_x`); boundary-condition code fills those guards
//! instead. The Y protocol routes the two sides of a split edge to the
//! "in" and "out" destination ranks recorded in the topology. Messages
//! are tagged by direction of travel; with FIFO ordering per peer pair and
//! a fixed posting order (in-leg before out-leg) this pairs sends and
//! receives unambiguously even when both legs target the same rank.
//!
//! A handle is consumed by `wait` (Rust move semantics make double-wait
//! unrepresentable); waiting on a handle created by a different mesh is a
//! protocol error. Self-connections (a periodic direction on a single
//! process) short-circuit through a local copy and never touch the
//! transport.

use log::{debug, trace};

use crate::comm::communicator::{Communicator, Wait};
use crate::error::{MeshHaloError, Result};
use crate::field::{FieldGroup, FieldPerp, FieldRef};
use crate::topology::Topology;

/// Tags name the direction a message travels in.
const TAG_X_IN: u16 = 0x10; // travelling -X
const TAG_X_OUT: u16 = 0x11; // travelling +X
const TAG_Y_UP: u16 = 0x12; // travelling +Y
const TAG_Y_DOWN: u16 = 0x13; // travelling -Y
const TAG_PERP: u16 = 0x14;
/// User point-to-point tags are offset past the engine's own channels.
const TAG_P2P_BASE: u16 = 0x100;

/// Guard region a completed receive unpacks into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guard {
    XIn,
    XOut,
    YDownIn,
    YDownOut,
    YUpIn,
    YUpOut,
}

impl Guard {
    /// Half-open (x, y) index ranges of the guard region.
    fn ranges(self, topo: &Topology) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
        match self {
            Guard::XIn => (0..topo.xstart, topo.ystart..topo.yend + 1),
            Guard::XOut => (topo.xend + 1..topo.local_nx, topo.ystart..topo.yend + 1),
            Guard::YDownIn => (0..topo.ydown_xsplit, 0..topo.ystart),
            Guard::YDownOut => (topo.ydown_xsplit..topo.local_nx, 0..topo.ystart),
            Guard::YUpIn => (0..topo.yup_xsplit, topo.yend + 1..topo.local_ny),
            Guard::YUpOut => (topo.yup_xsplit..topo.local_nx, topo.yend + 1..topo.local_ny),
        }
    }

    /// Interior cells packed when sending *toward* this guard's neighbour,
    /// mirroring what that neighbour's guard region expects.
    fn pack_ranges(self, topo: &Topology) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
        match self {
            Guard::XIn => (topo.xstart..topo.xstart + topo.mxg, topo.ystart..topo.yend + 1),
            Guard::XOut => (topo.xend + 1 - topo.mxg..topo.xend + 1, topo.ystart..topo.yend + 1),
            Guard::YDownIn => (0..topo.ydown_xsplit, topo.ystart..topo.ystart + topo.myg),
            Guard::YDownOut => (
                topo.ydown_xsplit..topo.local_nx,
                topo.ystart..topo.ystart + topo.myg,
            ),
            Guard::YUpIn => (0..topo.yup_xsplit, topo.yend + 1 - topo.myg..topo.yend + 1),
            Guard::YUpOut => (
                topo.yup_xsplit..topo.local_nx,
                topo.yend + 1 - topo.myg..topo.yend + 1,
            ),
        }
    }

    /// Tag of messages arriving into this guard region.
    fn recv_tag(self) -> u16 {
        match self {
            Guard::XIn => TAG_X_OUT,   // from the left, travelling +X
            Guard::XOut => TAG_X_IN,   // from the right, travelling -X
            Guard::YDownIn | Guard::YDownOut => TAG_Y_UP,
            Guard::YUpIn | Guard::YUpOut => TAG_Y_DOWN,
        }
    }

    /// Tag used when sending toward this guard's neighbour.
    fn send_tag(self) -> u16 {
        match self {
            Guard::XIn => TAG_X_IN,
            Guard::XOut => TAG_X_OUT,
            Guard::YDownIn | Guard::YDownOut => TAG_Y_DOWN,
            Guard::YUpIn | Guard::YUpOut => TAG_Y_UP,
        }
    }

    /// Neighbour rank in this direction, `None` at a physical edge or an
    /// empty split leg.
    fn peer(self, topo: &Topology) -> Option<usize> {
        let (xr, _) = self.ranges(topo);
        if xr.is_empty() {
            return None;
        }
        match self {
            Guard::XIn => topo.x_in_rank(),
            Guard::XOut => topo.x_out_rank(),
            Guard::YDownIn => topo.ydown_indest,
            Guard::YDownOut => topo.ydown_outdest,
            Guard::YUpIn => topo.yup_indest,
            Guard::YUpOut => topo.yup_outdest,
        }
    }
}

/// Fixed posting order: X first, then lower Y (in before out), then upper.
const ALL_GUARDS: [Guard; 6] = [
    Guard::XIn,
    Guard::XOut,
    Guard::YDownIn,
    Guard::YDownOut,
    Guard::YUpIn,
    Guard::YUpOut,
];

/// Number of scalar elements one exchange message carries for `group`
/// over the given index ranges.
pub fn msg_len(group: &FieldGroup<'_>, xr: &std::ops::Range<usize>, yr: &std::ops::Range<usize>) -> usize {
    group
        .iter()
        .map(|f| xr.len() * yr.len() * f.z_len())
        .sum()
}

struct PendingRecv<H> {
    guard: Guard,
    peer: usize,
    expected_bytes: usize,
    handle: H,
}

/// One in-flight grouped exchange.
///
/// Holds the field borrows until waited on, so the borrow checker rejects
/// touching a field (or grouping it again) while its exchange is pending.
/// Consumed exactly once by [`wait`]; a second wait is a compile error.
pub struct CommHandle<'a, C: Communicator> {
    mesh_id: u64,
    group: FieldGroup<'a>,
    recvs: Vec<PendingRecv<C::RecvHandle>>,
    /// Outstanding sends; completed in [`wait`] so their buffers may be
    /// reclaimed by transports that hold them until delivery.
    sends: Vec<C::SendHandle>,
    /// Self-connection payloads (periodic direction on one process),
    /// delivered without touching the transport.
    local: Vec<(Guard, Vec<f64>)>,
}

/// Post receives and sends for every active direction; returns the handle
/// to pass to [`wait`].
pub fn send<'a, C: Communicator>(
    topo: &Topology,
    comm: &C,
    mesh_id: u64,
    group: FieldGroup<'a>,
) -> Result<CommHandle<'a, C>> {
    validate_group(topo, &group)?;

    let me = topo.rank();
    let active: Vec<Guard> = ALL_GUARDS
        .iter()
        .copied()
        .filter(|&g| {
            if group.is_xz_only()
                && matches!(
                    g,
                    Guard::YDownIn | Guard::YDownOut | Guard::YUpIn | Guard::YUpOut
                )
            {
                return false;
            }
            g.peer(topo).is_some()
        })
        .collect();

    // Receives first, in fixed order, to avoid circular waits.
    let mut recvs = Vec::new();
    for &g in &active {
        let peer = g.peer(topo).unwrap();
        if peer == me {
            continue; // handled by local copy below
        }
        let (xr, yr) = g.ranges(topo);
        let expected_bytes = msg_len(&group, &xr, &yr) * std::mem::size_of::<f64>();
        trace!("rank {me}: posting recv {g:?} from {peer} ({expected_bytes} bytes)");
        recvs.push(PendingRecv {
            guard: g,
            peer,
            expected_bytes,
            handle: comm.irecv(peer, g.recv_tag(), expected_bytes),
        });
    }

    // Then pack and send.
    let mut local = Vec::new();
    let mut sends = Vec::new();
    for &g in &active {
        let peer = g.peer(topo).unwrap();
        let (xr, yr) = g.pack_ranges(topo);
        let buf = pack(&group, &xr, &yr);
        if peer == me {
            // A periodic direction wrapping onto the same process: the
            // packed interior is exactly what the opposite guard expects.
            local.push((opposite(g), buf));
        } else {
            trace!("rank {me}: sending {g:?} to {peer} ({} elems)", buf.len());
            sends.push(comm.isend(peer, g.send_tag(), bytemuck::cast_slice(&buf)));
        }
    }

    debug!(
        "rank {me}: exchange posted ({} recvs, {} sends, {} local copies, {} fields)",
        recvs.len(),
        sends.len(),
        local.len(),
        group.len()
    );
    Ok(CommHandle {
        mesh_id,
        group,
        recvs,
        sends,
        local,
    })
}

/// Block until every request in `handle` completes, then unpack into the
/// guard regions. Returns the group, releasing the field borrows.
pub fn wait<'a, C: Communicator>(
    topo: &Topology,
    mesh_id: u64,
    handle: CommHandle<'a, C>,
) -> Result<FieldGroup<'a>> {
    if handle.mesh_id != mesh_id {
        return Err(MeshHaloError::ForeignHandle {
            handle_mesh: handle.mesh_id,
            this_mesh: mesh_id,
        });
    }
    let CommHandle {
        mut group,
        recvs,
        sends,
        local,
        ..
    } = handle;

    for pending in recvs {
        let data = pending.handle.wait().ok_or(MeshHaloError::RecvFailed {
            peer: pending.peer,
            tag: pending.guard.recv_tag(),
        })?;
        if data.len() != pending.expected_bytes {
            return Err(MeshHaloError::MessageSizeMismatch {
                peer: pending.peer,
                expected: pending.expected_bytes,
                got: data.len(),
            });
        }
        let values: Vec<f64> = bytemuck::pod_collect_to_vec(&data);
        let (xr, yr) = pending.guard.ranges(topo);
        unpack(&mut group, &xr, &yr, &values);
    }
    for (guard, values) in local {
        let (xr, yr) = guard.ranges(topo);
        unpack(&mut group, &xr, &yr, &values);
    }
    // Complete the sends last so transports can release their buffers.
    for s in sends {
        let _ = s.wait();
    }
    Ok(group)
}

/// Blocking grouped exchange: `send` then `wait`. On return every field in
/// the group has valid guard-cell data in all communicated directions.
pub fn communicate<'a, C: Communicator>(
    topo: &Topology,
    comm: &C,
    mesh_id: u64,
    group: FieldGroup<'a>,
) -> Result<FieldGroup<'a>> {
    let handle = send(topo, comm, mesh_id, group)?;
    wait(topo, mesh_id, handle)
}

/// X-direction exchange of a single perpendicular slice.
pub fn communicate_perp<C: Communicator>(
    topo: &Topology,
    comm: &C,
    f: &mut FieldPerp,
) -> Result<()> {
    let (nx, nz) = f.shape();
    if (nx, nz) != (topo.local_nx, topo.local_nz) {
        return Err(MeshHaloError::FieldShapeMismatch {
            index: 0,
            expected: (topo.local_nx, 1, topo.local_nz),
            got: (nx, 1, nz),
        });
    }
    let me = topo.rank();
    let in_cols = pack_perp(f, topo.xstart..topo.xstart + topo.mxg);
    let out_cols = pack_perp(f, topo.xend + 1 - topo.mxg..topo.xend + 1);

    // Each entry: (guard range, recv tag, send tag, peer, payload to send).
    // A self-peer (periodic X on one process) skips the transport; its
    // guard is filled from the *opposite* edge's interior columns.
    let directions = [
        (
            topo.x_in_rank(),
            0..topo.xstart,
            TAG_X_OUT + TAG_PERP,
            TAG_X_IN + TAG_PERP,
            in_cols,
            out_cols.clone(),
        ),
        (
            topo.x_out_rank(),
            topo.xend + 1..topo.local_nx,
            TAG_X_IN + TAG_PERP,
            TAG_X_OUT + TAG_PERP,
            out_cols.clone(),
            in_cols_of(f, topo),
        ),
    ];

    let mut pending = Vec::new();
    for (peer, guard_xr, recv_tag, send_tag, payload, wrap) in directions {
        let Some(peer) = peer else { continue };
        let bytes = guard_xr.len() * nz * std::mem::size_of::<f64>();
        if peer == me {
            pending.push((guard_xr, None, peer, send_tag, payload, Some(wrap)));
        } else {
            let h = comm.irecv(peer, recv_tag, bytes);
            pending.push((guard_xr, Some(h), peer, send_tag, payload, None));
        }
    }
    // All receives are posted; now send.
    let mut sends = Vec::new();
    for (_, handle, peer, send_tag, payload, _) in &pending {
        if handle.is_some() {
            sends.push(comm.isend(*peer, *send_tag, bytemuck::cast_slice(payload)));
        }
    }
    for (guard_xr, handle, peer, send_tag, _, wrap) in pending {
        let values: Vec<f64> = match handle {
            Some(h) => {
                let data = h.wait().ok_or(MeshHaloError::RecvFailed {
                    peer,
                    tag: send_tag,
                })?;
                let expected = guard_xr.len() * nz * std::mem::size_of::<f64>();
                if data.len() != expected {
                    return Err(MeshHaloError::MessageSizeMismatch {
                        peer,
                        expected,
                        got: data.len(),
                    });
                }
                bytemuck::pod_collect_to_vec(&data)
            }
            None => wrap.expect("self-peer entries carry the wrap payload"),
        };
        let mut it = values.into_iter();
        for x in guard_xr {
            for z in 0..nz {
                f.set(x, z, it.next().expect("perp buffer length checked"));
            }
        }
    }
    for s in sends {
        let _ = s.wait();
    }
    Ok(())
}

fn pack_perp(f: &FieldPerp, xr: std::ops::Range<usize>) -> Vec<f64> {
    let (_, nz) = f.shape();
    let mut buf = Vec::with_capacity(xr.len() * nz);
    for x in xr {
        for z in 0..nz {
            buf.push(f.get(x, z));
        }
    }
    buf
}

fn in_cols_of(f: &FieldPerp, topo: &Topology) -> Vec<f64> {
    pack_perp(f, topo.xstart..topo.xstart + topo.mxg)
}

/// Handle for a pending low-level point-to-point receive.
pub struct ProcRecvHandle<H> {
    peer: usize,
    tag: u16,
    expected_bytes: usize,
    handle: H,
}

impl<H: Wait> ProcRecvHandle<H> {
    /// Block until the message arrives; size mismatch is fatal.
    pub fn wait(self) -> Result<Vec<f64>> {
        let data = self.handle.wait().ok_or(MeshHaloError::RecvFailed {
            peer: self.peer,
            tag: self.tag,
        })?;
        if data.len() != self.expected_bytes {
            return Err(MeshHaloError::MessageSizeMismatch {
                peer: self.peer,
                expected: self.expected_bytes,
                got: data.len(),
            });
        }
        Ok(bytemuck::pod_collect_to_vec(&data))
    }
}

/// Send a buffer to the processor at grid position (`xproc`, `yproc`).
/// Must be matched by [`recv_from_proc`] with the same tag and length on
/// the receiving processor.
pub fn send_to_proc<C: Communicator>(
    topo: &Topology,
    comm: &C,
    xproc: usize,
    yproc: usize,
    buffer: &[f64],
    tag: u16,
) -> C::SendHandle {
    let peer = yproc * topo.nxpe + xproc;
    comm.isend(peer, TAG_P2P_BASE + tag, bytemuck::cast_slice(buffer))
}

/// Post a receive for `len` scalars from processor (`xproc`, `yproc`).
pub fn recv_from_proc<C: Communicator>(
    topo: &Topology,
    comm: &C,
    xproc: usize,
    yproc: usize,
    len: usize,
    tag: u16,
) -> ProcRecvHandle<C::RecvHandle> {
    let peer = yproc * topo.nxpe + xproc;
    let expected_bytes = len * std::mem::size_of::<f64>();
    ProcRecvHandle {
        peer,
        tag: TAG_P2P_BASE + tag,
        expected_bytes,
        handle: comm.irecv(peer, TAG_P2P_BASE + tag, expected_bytes),
    }
}

fn opposite(g: Guard) -> Guard {
    match g {
        Guard::XIn => Guard::XOut,
        Guard::XOut => Guard::XIn,
        Guard::YDownIn => Guard::YUpIn,
        Guard::YDownOut => Guard::YUpOut,
        Guard::YUpIn => Guard::YDownIn,
        Guard::YUpOut => Guard::YDownOut,
    }
}

fn validate_group(topo: &Topology, group: &FieldGroup<'_>) -> Result<()> {
    for (i, f) in group.iter().enumerate() {
        let (nx, ny, nz) = f.shape();
        let ok = match f {
            FieldRef::F2(_) => (nx, ny) == (topo.local_nx, topo.local_ny),
            FieldRef::F3(_) => (nx, ny, nz) == topo.shape(),
        };
        if !ok {
            return Err(MeshHaloError::FieldShapeMismatch {
                index: i,
                expected: topo.shape(),
                got: (nx, ny, nz),
            });
        }
    }
    Ok(())
}

/// Pack the given index ranges of every field, in group order.
fn pack(group: &FieldGroup<'_>, xr: &std::ops::Range<usize>, yr: &std::ops::Range<usize>) -> Vec<f64> {
    let mut buf = Vec::with_capacity(msg_len(group, xr, yr));
    for field in group.iter() {
        match field {
            FieldRef::F2(f) => {
                for x in xr.clone() {
                    for y in yr.clone() {
                        buf.push(f.get(x, y));
                    }
                }
            }
            FieldRef::F3(f) => {
                let (_, _, nz) = f.shape();
                for x in xr.clone() {
                    for y in yr.clone() {
                        for z in 0..nz {
                            buf.push(f.get(x, y, z));
                        }
                    }
                }
            }
        }
    }
    buf
}

/// Unpack a received buffer into the guard ranges, in the same field order
/// used by [`pack`].
fn unpack(
    group: &mut FieldGroup<'_>,
    xr: &std::ops::Range<usize>,
    yr: &std::ops::Range<usize>,
    values: &[f64],
) {
    let mut it = values.iter().copied();
    for field in group.iter_mut() {
        match field {
            FieldRef::F2(f) => {
                for x in xr.clone() {
                    for y in yr.clone() {
                        f.set(x, y, it.next().expect("buffer length checked before unpack"));
                    }
                }
            }
            FieldRef::F3(f) => {
                let (_, _, nz) = f.shape();
                for x in xr.clone() {
                    for y in yr.clone() {
                        for z in 0..nz {
                            f.set(x, y, z, it.next().expect("buffer length checked before unpack"));
                        }
                    }
                }
            }
        }
    }
    debug_assert!(it.next().is_none(), "unpack consumed fewer values than received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{Field2D, Field3D};
    use crate::options::MeshOptions;

    #[test]
    fn msg_len_counts_all_fields() {
        let topo = Topology::serial(&MeshOptions::serial(4, 4, 3)).unwrap();
        let mut a = Field3D::zeros(&topo);
        let mut b = Field2D::zeros(&topo);
        let g = FieldGroup::new().add3d(&mut a).add2d(&mut b);
        // 2 columns x 4 interior rows: 3D contributes *3, 2D contributes *1
        assert_eq!(msg_len(&g, &(0..2), &(2..6)), 2 * 4 * 3 + 2 * 4);
    }

    #[test]
    fn pack_unpack_round_trip_preserves_order() {
        let topo = Topology::serial(&MeshOptions::serial(4, 4, 2)).unwrap();
        let mut a = Field3D::from_fn(&topo, |x, y, z| (x * 100 + y * 10 + z) as f64);
        let mut b = Field2D::from_fn(&topo, |x, y| -((x * 10 + y) as f64));
        let (xr, yr) = (2..4, 2..6);

        let buf = {
            let g = FieldGroup::new().add3d(&mut a).add2d(&mut b);
            pack(&g, &xr, &yr)
        };
        let mut a2 = Field3D::zeros(&topo);
        let mut b2 = Field2D::zeros(&topo);
        let mut g2 = FieldGroup::new().add3d(&mut a2).add2d(&mut b2);
        unpack(&mut g2, &xr, &yr, &buf);
        drop(g2);

        for x in xr.clone() {
            for y in yr.clone() {
                assert_eq!(a2.get(x, y, 0), a.get(x, y, 0));
                assert_eq!(a2.get(x, y, 1), a.get(x, y, 1));
                assert_eq!(b2.get(x, y), b.get(x, y));
            }
        }
    }

    #[test]
    fn serial_nonperiodic_mesh_has_no_active_direction() {
        let topo = Topology::serial(&MeshOptions::serial(4, 4, 2)).unwrap();
        for g in ALL_GUARDS {
            assert_eq!(g.peer(&topo), None, "{g:?} unexpectedly active");
        }
    }

    #[test]
    fn serial_periodic_x_wraps_through_local_copy() {
        let mut opts = MeshOptions::serial(4, 4, 2);
        opts.periodic_x = true;
        let topo = Topology::serial(&opts).unwrap();
        let comm = crate::comm::NoComm;
        let mut f = Field3D::from_fn(&topo, |x, y, z| (x * 100 + y * 10 + z) as f64);
        let g = FieldGroup::new().add3d(&mut f);
        let g = communicate(&topo, &comm, 0, g).unwrap();
        drop(g);
        // left guard columns now mirror the rightmost interior columns
        for y in topo.ystart..=topo.yend {
            for z in 0..topo.local_nz {
                assert_eq!(f.get(0, y, z), f.get(topo.xend - 1, y, z));
                assert_eq!(f.get(1, y, z), f.get(topo.xend, y, z));
            }
        }
    }

    #[test]
    fn foreign_handle_is_rejected() {
        let mut opts = MeshOptions::serial(4, 4, 2);
        opts.periodic_x = true;
        let topo = Topology::serial(&opts).unwrap();
        let comm = crate::comm::NoComm;
        let mut f = Field3D::zeros(&topo);
        let g = FieldGroup::new().add3d(&mut f);
        let handle = send(&topo, &comm, 7, g).unwrap();
        let err = wait::<crate::comm::NoComm>(&topo, 8, handle).unwrap_err();
        assert_eq!(
            err,
            MeshHaloError::ForeignHandle {
                handle_mesh: 7,
                this_mesh: 8
            }
        );
    }

    #[test]
    fn mismatched_group_shape_is_rejected() {
        let topo = Topology::serial(&MeshOptions::serial(4, 4, 2)).unwrap();
        let other = Topology::serial(&MeshOptions::serial(8, 4, 2)).unwrap();
        let comm = crate::comm::NoComm;
        let mut f = Field3D::zeros(&other);
        let g = FieldGroup::new().add3d(&mut f);
        let err = match send(&topo, &comm, 0, g) {
            Ok(_) => panic!("mismatched group accepted"),
            Err(e) => e,
        };
        assert!(matches!(err, MeshHaloError::FieldShapeMismatch { index: 0, .. }));
    }
}
