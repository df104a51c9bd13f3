//! Collective primitives over a [`Fabric`]
//!
//! Every function here is a full-group operation: all ranks must call the
//! same function, in the same order, with agreeing counts and root. The
//! algorithms are flat: the root talks to every other rank directly, in rank
//! order.
//!
//! Element payloads are prefixed with a one-byte [`DataType`] tag so a rank
//! that receives a payload of another element type fails loudly instead of
//! reinterpreting bytes.

use std::fmt;

use tracing::trace;

use crate::fabric::Fabric;
use crate::{CollectiveError, Result};

/// Wire-level element type descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    U8 = 1,
    I32 = 2,
    U32 = 3,
    I64 = 4,
    U64 = 5,
    F32 = 6,
    F64 = 7,
}

impl DataType {
    pub fn size_in_bytes(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            1 => Self::U8,
            2 => Self::I32,
            3 => Self::U32,
            4 => Self::I64,
            5 => Self::U64,
            6 => Self::F32,
            7 => Self::F64,
            other => return Err(CollectiveError::UnknownDataType(other)),
        })
    }
}

/// Element-wise reduction operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Prod,
    Max,
    Min,
}

/// A type that can travel through the collectives.
///
/// Integer reductions wrap on overflow.
pub trait Element: Copy + Send + Sync + PartialOrd + fmt::Debug + 'static {
    /// Descriptor used to tag payloads of this type
    const DTYPE: DataType;

    /// Append the little-endian encoding of `self`
    fn write_le(self, out: &mut Vec<u8>);

    /// Decode from exactly `DTYPE.size_in_bytes()` bytes
    fn read_le(bytes: &[u8]) -> Self;

    /// Combine two values under `op`
    fn combine(self, other: Self, op: ReduceOp) -> Self;
}

macro_rules! impl_element_int {
    ($($t:ty => $dtype:ident),* $(,)?) => {$(
        impl Element for $t {
            const DTYPE: DataType = DataType::$dtype;

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_le_bytes(raw)
            }

            fn combine(self, other: Self, op: ReduceOp) -> Self {
                match op {
                    ReduceOp::Sum => self.wrapping_add(other),
                    ReduceOp::Prod => self.wrapping_mul(other),
                    ReduceOp::Max => Ord::max(self, other),
                    ReduceOp::Min => Ord::min(self, other),
                }
            }
        }
    )*};
}

macro_rules! impl_element_float {
    ($($t:ty => $dtype:ident),* $(,)?) => {$(
        impl Element for $t {
            const DTYPE: DataType = DataType::$dtype;

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_le_bytes(raw)
            }

            fn combine(self, other: Self, op: ReduceOp) -> Self {
                match op {
                    ReduceOp::Sum => self + other,
                    ReduceOp::Prod => self * other,
                    ReduceOp::Max => self.max(other),
                    ReduceOp::Min => self.min(other),
                }
            }
        }
    )*};
}

impl_element_int!(u8 => U8, i32 => I32, u32 => U32, i64 => I64, u64 => U64);
impl_element_float!(f32 => F32, f64 => F64);

/// Encode a tagged payload
pub fn encode<T: Element>(values: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + values.len() * T::DTYPE.size_in_bytes());
    out.push(T::DTYPE.tag());
    for v in values {
        v.write_le(&mut out);
    }
    out
}

/// Decode a tagged payload of exactly `expected` elements
pub fn decode<T: Element>(bytes: &[u8], expected: usize) -> Result<Vec<T>> {
    let (&tag, body) = bytes
        .split_first()
        .ok_or(CollectiveError::BufferSizeMismatch { expected, actual: 0 })?;

    let actual_type = DataType::from_tag(tag)?;
    if actual_type != T::DTYPE {
        return Err(CollectiveError::TypeMismatch {
            expected: T::DTYPE,
            actual: actual_type,
        });
    }

    let size = T::DTYPE.size_in_bytes();
    if body.len() % size != 0 || body.len() / size != expected {
        return Err(CollectiveError::BufferSizeMismatch {
            expected,
            actual: body.len() / size,
        });
    }

    Ok(body.chunks_exact(size).map(T::read_le).collect())
}

async fn send_elems<F, T>(fabric: &F, peer: usize, values: &[T]) -> Result<()>
where
    F: Fabric + ?Sized,
    T: Element,
{
    fabric.send(peer, &encode(values)).await
}

async fn recv_elems<F, T>(fabric: &F, peer: usize, expected: usize) -> Result<Vec<T>>
where
    F: Fabric + ?Sized,
    T: Element,
{
    let bytes = fabric.recv(peer).await?;
    decode(&bytes, expected)
}

fn check_root<F: Fabric + ?Sized>(fabric: &F, root: usize) -> Result<()> {
    if root >= fabric.world_size() {
        return Err(CollectiveError::InvalidRank {
            rank: root,
            world_size: fabric.world_size(),
        });
    }
    Ok(())
}

fn check_layout<F: Fabric + ?Sized>(fabric: &F, counts: &[usize], displs: &[usize]) -> Result<()> {
    let world = fabric.world_size();
    for len in [counts.len(), displs.len()] {
        if len != world {
            return Err(CollectiveError::BufferSizeMismatch {
                expected: world,
                actual: len,
            });
        }
    }
    Ok(())
}

fn check_len(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(CollectiveError::BufferSizeMismatch { expected, actual });
    }
    Ok(())
}

fn window<T>(buf: &[T], displ: usize, count: usize) -> Result<&[T]> {
    buf.get(displ..displ + count)
        .ok_or(CollectiveError::BufferSizeMismatch {
            expected: displ + count,
            actual: buf.len(),
        })
}

fn window_mut<T>(buf: &mut [T], displ: usize, count: usize) -> Result<&mut [T]> {
    let actual = buf.len();
    buf.get_mut(displ..displ + count)
        .ok_or(CollectiveError::BufferSizeMismatch {
            expected: displ + count,
            actual,
        })
}

/// Replicate `buf` from `root` to every rank. All ranks pass a buffer of the same length.
pub async fn broadcast<F, T>(fabric: &F, buf: &mut [T], root: usize) -> Result<()>
where
    F: Fabric + ?Sized,
    T: Element,
{
    check_root(fabric, root)?;
    trace!(rank = fabric.rank(), root, len = buf.len(), "broadcast");

    if fabric.rank() == root {
        let payload = encode(buf);
        for peer in (0..fabric.world_size()).filter(|&p| p != root) {
            fabric.send(peer, &payload).await?;
        }
    } else {
        let received = recv_elems::<F, T>(fabric, root, buf.len()).await?;
        buf.copy_from_slice(&received);
    }
    Ok(())
}

/// Hand rank `r` the window `send[displs[r] .. displs[r] + counts[r]]` of the root's buffer.
///
/// `send` is only read on the root. `recv` must hold exactly `counts[rank]` elements.
pub async fn scatterv<F, T>(
    fabric: &F,
    send: &[T],
    counts: &[usize],
    displs: &[usize],
    recv: &mut [T],
    root: usize,
) -> Result<()>
where
    F: Fabric + ?Sized,
    T: Element,
{
    check_root(fabric, root)?;
    check_layout(fabric, counts, displs)?;
    let rank = fabric.rank();
    check_len(counts[rank], recv.len())?;
    trace!(rank, root, count = recv.len(), "scatterv");

    if rank == root {
        for peer in (0..fabric.world_size()).filter(|&p| p != root) {
            send_elems(fabric, peer, window(send, displs[peer], counts[peer])?).await?;
        }
        recv.copy_from_slice(window(send, displs[root], counts[root])?);
    } else {
        let received = recv_elems::<F, T>(fabric, root, recv.len()).await?;
        recv.copy_from_slice(&received);
    }
    Ok(())
}

/// Assemble every rank's `send` at `displs[r]` inside the root's `recv`.
///
/// `recv` is only written on the root.
pub async fn gatherv<F, T>(
    fabric: &F,
    send: &[T],
    recv: &mut [T],
    counts: &[usize],
    displs: &[usize],
    root: usize,
) -> Result<()>
where
    F: Fabric + ?Sized,
    T: Element,
{
    check_root(fabric, root)?;
    check_layout(fabric, counts, displs)?;
    let rank = fabric.rank();
    check_len(counts[rank], send.len())?;
    trace!(rank, root, count = send.len(), "gatherv");

    if rank == root {
        window_mut(recv, displs[root], counts[root])?.copy_from_slice(send);
        for peer in (0..fabric.world_size()).filter(|&p| p != root) {
            let part = recv_elems::<F, T>(fabric, peer, counts[peer]).await?;
            window_mut(recv, displs[peer], counts[peer])?.copy_from_slice(&part);
        }
    } else {
        send_elems(fabric, root, send).await?;
    }
    Ok(())
}

/// [`gatherv`] whose result lands on every rank.
pub async fn allgatherv<F, T>(
    fabric: &F,
    send: &[T],
    recv: &mut [T],
    counts: &[usize],
    displs: &[usize],
) -> Result<()>
where
    F: Fabric + ?Sized,
    T: Element,
{
    gatherv(fabric, send, recv, counts, displs, 0).await?;
    broadcast(fabric, recv, 0).await
}

/// Combine every rank's `send` element-wise into the root's `recv`.
///
/// Contributions are folded in rank order. `recv` is only written on the root.
pub async fn reduce<F, T>(fabric: &F, send: &[T], recv: &mut [T], op: ReduceOp, root: usize) -> Result<()>
where
    F: Fabric + ?Sized,
    T: Element,
{
    check_root(fabric, root)?;
    let rank = fabric.rank();
    trace!(rank, root, len = send.len(), ?op, "reduce");

    if rank != root {
        return send_elems(fabric, root, send).await;
    }

    check_len(send.len(), recv.len())?;
    let mut acc: Option<Vec<T>> = None;
    for peer in 0..fabric.world_size() {
        let part = if peer == root {
            send.to_vec()
        } else {
            recv_elems::<F, T>(fabric, peer, send.len()).await?
        };
        acc = Some(match acc {
            None => part,
            Some(mut acc) => {
                for (a, b) in acc.iter_mut().zip(part) {
                    *a = a.combine(b, op);
                }
                acc
            }
        });
    }
    if let Some(acc) = acc {
        recv.copy_from_slice(&acc);
    }
    Ok(())
}

/// [`reduce`] whose result lands on every rank.
pub async fn allreduce<F, T>(fabric: &F, send: &[T], recv: &mut [T], op: ReduceOp) -> Result<()>
where
    F: Fabric + ?Sized,
    T: Element,
{
    check_len(send.len(), recv.len())?;
    reduce(fabric, send, recv, op, 0).await?;
    broadcast(fabric, recv, 0).await
}

/// Block until every rank has entered the barrier.
pub async fn barrier<F: Fabric + ?Sized>(fabric: &F) -> Result<()> {
    let rank = fabric.rank();
    trace!(rank, "barrier");
    if rank == 0 {
        for peer in 1..fabric.world_size() {
            fabric.recv(peer).await?;
        }
        for peer in 1..fabric.world_size() {
            fabric.send(peer, &[]).await?;
        }
    } else {
        fabric.send(0, &[]).await?;
        fabric.recv(0).await?;
    }
    Ok(())
}
