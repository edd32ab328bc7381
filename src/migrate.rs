use crate::comm::Communicator;
use crate::divide::PartLayout;
use crate::dot::Dot;
use crate::error::Result;
use crate::group::ProcGroup;
use crate::tree::{CutTree, Side};

/// Dots owned by this process during a partitioning call.
///
/// Growth goes through [`Vec::try_reserve_exact`], so running out of memory is
/// reported instead of aborting, and is sized by the overallocation factor.
#[derive(Debug)]
pub(crate) struct DotBuffer {
    dots: Vec<Dot>,
    overalloc: f64,
    reallocs: usize,
}

impl DotBuffer {
    pub fn new(dots: Vec<Dot>, overalloc: f64) -> Self {
        Self { dots, overalloc, reallocs: 0 }
    }

    pub fn dots(&self) -> &[Dot] {
        &self.dots
    }

    pub fn dots_mut(&mut self) -> &mut [Dot] {
        &mut self.dots
    }

    pub fn len(&self) -> usize {
        self.dots.len()
    }

    pub fn reallocs(&self) -> usize {
        self.reallocs
    }

    pub fn into_dots(self) -> Vec<Dot> {
        self.dots
    }

    /// Makes room for `needed` dots in total. Returns whether storage was reallocated.
    pub fn reserve_for(&mut self, needed: usize) -> Result<bool> {
        if needed <= self.dots.capacity() {
            return Ok(false);
        }
        let wanted = ((needed as f64) * self.overalloc).ceil() as usize;
        let wanted = wanted.max(needed);
        self.dots.try_reserve_exact(wanted - self.dots.len())?;
        self.reallocs += 1;
        Ok(true)
    }
}

/// Traffic of one exchange, as seen by this process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Traffic {
    pub sent: usize,
    pub received: usize,
}

/// Copies departing dots into one list per destination, sized up front.
fn pack_outgoing(dots: &[Dot], destinations: &[usize], me: usize, size: usize) -> Result<Vec<Vec<Dot>>> {
    let mut counts = vec![0usize; size];
    for &d in destinations.iter().filter(|&&d| d != me) {
        counts[d] += 1;
    }
    let mut outgoing: Vec<Vec<Dot>> = Vec::new();
    outgoing.try_reserve_exact(size)?;
    for count in counts {
        let mut list = Vec::new();
        list.try_reserve_exact(count)?;
        outgoing.push(list);
    }
    for (dot, &d) in dots.iter().zip(destinations) {
        if d != me {
            outgoing[d].push(*dot);
        }
    }
    Ok(outgoing)
}

/// Moves every dot to the group member named by `route`.
///
/// `route(i, dot)` returns the group index of the destination of local dot `i`.
/// Dots that stay keep their relative order; arrivals are appended in the order of
/// their source ranks. Collective over `group`, agreeing on failure at each step.
fn exchange<C, F>(group: &ProcGroup<C>, buffer: &mut DotBuffer, route: F) -> Result<Traffic>
where
    C: Communicator,
    F: Fn(usize, &Dot) -> usize,
{
    let me = group.index();
    let destinations: Vec<usize> = buffer
        .dots()
        .iter()
        .enumerate()
        .map(|(i, dot)| route(i, dot))
        .collect();

    let plan = pack_outgoing(buffer.dots(), &destinations, me, group.size());
    let outgoing = group.agree(plan)?;

    let sent: usize = outgoing.iter().map(Vec::len).sum();
    let mut i = 0;
    buffer.dots.retain(|_| {
        let stays = destinations[i] == me;
        i += 1;
        stays
    });

    let incoming = group.all_to_all(outgoing)?;
    let received: usize = incoming.iter().map(Vec::len).sum();
    group.agree(buffer.reserve_for(buffer.len() + received))?;
    for list in incoming {
        buffer.dots.extend(list);
    }
    Ok(Traffic { sent, received })
}

/// Sends dots marked for the other half of the group across the cut.
///
/// `procmid` is the group index of the first member of the high half. Outgoing dots
/// are dealt round-robin over the members of the other half, starting at an offset
/// given by the sender's position, so receivers are loaded evenly.
pub(crate) fn send_outgoing<C: Communicator>(
    group: &ProcGroup<C>,
    buffer: &mut DotBuffer,
    marks: &[u8],
    side: Side,
    procmid: usize,
) -> Result<Traffic> {
    let me = group.index();
    let (other_lower, other_size) = match side {
        Side::Low => (procmid, group.size() - procmid),
        Side::High => (0, procmid),
    };
    let mine = side.index() as u8;
    let mut prefix = Vec::with_capacity(marks.len());
    let mut leaving = 0usize;
    for &m in marks {
        prefix.push(leaving);
        if m != mine { leaving += 1; }
    }
    exchange(group, buffer, |i, _| {
        if marks[i] == mine || other_size == 0 {
            me
        } else {
            other_lower + (me + prefix[i]) % other_size
        }
    })
}

/// A member of a tracked group that is done splitting still enters every exchange.
pub(crate) fn send_nothing<C: Communicator>(group: &ProcGroup<C>, buffer: &mut DotBuffer) -> Result<Traffic> {
    let me = group.index();
    exchange(group, buffer, |_, _| me)
}

/// Sends every dot to the owner of its partition. `world` must span all processes.
pub(crate) fn send_to_part<C: Communicator>(
    world: &ProcGroup<C>,
    buffer: &mut DotBuffer,
    layout: &PartLayout,
) -> Result<Traffic> {
    let last = layout.num_parts().saturating_sub(1);
    exchange(world, buffer, |_, dot| layout.owner(dot.part.min(last)))
}

/// Sends every dot to the owner of the partition the previous cut tree assigns it.
pub(crate) fn send_to_previous<C: Communicator>(
    world: &ProcGroup<C>,
    buffer: &mut DotBuffer,
    layout: &PartLayout,
    previous: &CutTree,
) -> Result<Traffic> {
    let me = world.index();
    exchange(world, buffer, |_, dot| match previous.point_assign(&dot.coords) {
        Some(part) if part < layout.num_parts() => layout.owner(part),
        _ => me,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::threads;
    use crate::dot::DotId;
    use crate::median::{HIGH, LOW};

    fn dots_for(rank: usize, n: usize) -> Vec<Dot> {
        (0..n)
            .map(|i| Dot::new(DotId::new((rank * 100 + i) as u64, i as u64), [i as f64, 0.0, 0.0]))
            .collect()
    }

    #[test]
    fn test_reserve_applies_overalloc() {
        let mut buffer = DotBuffer::new(Vec::new(), 1.5);
        assert!(buffer.reserve_for(10).unwrap());
        assert!(buffer.dots.capacity() >= 15);
        assert!(!buffer.reserve_for(12).unwrap());
        assert_eq!(buffer.reallocs(), 1);
    }

    #[test]
    fn test_send_outgoing_crosses_the_cut() {
        let results = threads::run(4, |comm| {
            let group = ProcGroup::whole(comm.clone());
            let mut buffer = DotBuffer::new(dots_for(comm.rank(), 6), 1.0);
            let side = if comm.rank() < 2 { Side::Low } else { Side::High };
            // Low ranks keep their first half; high ranks keep their second half.
            let marks: Vec<u8> = (0..6).map(|i| if i < 3 { LOW } else { HIGH }).collect();
            let traffic = send_outgoing(&group, &mut buffer, &marks, side, 2).unwrap();
            let ids: Vec<u64> = buffer.dots().iter().map(|d| d.id.global).collect();
            (traffic, ids)
        })
        .unwrap();

        let total: usize = results.iter().map(|r| r.1.len()).sum();
        assert_eq!(total, 24);
        for (rank, (traffic, ids)) in results.iter().enumerate() {
            assert_eq!(traffic.sent, 3);
            assert_eq!(traffic.received, 3);
            // Staying dots come first, in their original order.
            let kept: Vec<u64> = if rank < 2 {
                (0..3).map(|i| (rank * 100 + i) as u64).collect()
            } else {
                (3..6).map(|i| (rank * 100 + i) as u64).collect()
            };
            assert_eq!(&ids[..3], &kept[..]);
            for id in ids {
                let local = (id % 100) as usize;
                if rank < 2 { assert!(local < 3); } else { assert!(local >= 3); }
            }
        }
    }

    #[test]
    fn test_send_to_part_reaches_owners() {
        let results = threads::run(3, |comm| {
            let world = ProcGroup::whole(comm.clone());
            let layout = PartLayout::new(3, 3);
            let dots: Vec<Dot> = dots_for(comm.rank(), 6)
                .into_iter()
                .enumerate()
                .map(|(i, d)| d.with_part(i % 3))
                .collect();
            let mut buffer = DotBuffer::new(dots, 1.0);
            send_to_part(&world, &mut buffer, &layout).unwrap();
            buffer.into_dots()
        })
        .unwrap();
        for (rank, dots) in results.iter().enumerate() {
            assert_eq!(dots.len(), 6);
            assert!(dots.iter().all(|d| d.part == rank));
        }
    }
}
