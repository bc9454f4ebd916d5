//! Allocation engine. Pure computation, no I/O.
//!
//! Splits a resource's units across a session's participants:
//!
//! 1. Resolve the target unit count (copies or absolute count, depending on
//!    the resource's scaling) and the count the split is computed on.
//! 2. Give every participant `base` units, the first `remainder` one more.
//! 3. Lay the shares out as chunks: one full-range chunk each (joint),
//!    one contiguous range each (linear), or ranges that wrap at the
//!    single-copy boundary (wrapping).
//! 4. For virtually-sized resources, map virtual positions back onto real ones.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{ResourceDescriptor, ResourceId, Scaling, Variant, VirtualSizing};

/// Largest participant count the allocator accepts.
pub const MAX_PARTICIPANTS: u32 = 10_000;

/// How shares are materialized into chunk ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Every participant repeats the whole target.
    Joint,
    /// One contiguous range per participant over `[1, target]`.
    Linear,
    /// Ranges that restart at 1 whenever a copy boundary is crossed.
    Wrapping,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Mode::Joint => "joint",
            Mode::Linear => "linear",
            Mode::Wrapping => "wrapping",
        };
        write!(f, "{s}")
    }
}

/// One chunk produced by the allocator, before it is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpec {
    /// 1-based participant slot.
    pub participant_index: u32,
    pub start_unit: u32,
    pub end_unit: u32,
    /// Initial progress; `None` for variants with binary completion.
    pub progress: Option<u32>,
}

impl ChunkSpec {
    pub fn unit_count(&self) -> u32 {
        self.end_unit - self.start_unit + 1
    }
}

/// Result of allocating one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub resource_id: ResourceId,
    pub mode: Mode,
    /// Real units the session has to cover (per participant, in joint mode).
    pub target_units: u32,
    /// Units the proportional split was computed on.
    pub calculation_units: u32,
    /// Chunks in emission order: by participant, then by position.
    pub chunks: Vec<ChunkSpec>,
}

impl Allocation {
    /// Total real units held by one participant slot.
    pub fn units_for(&self, participant_index: u32) -> u32 {
        self.chunks
            .iter()
            .filter(|c| c.participant_index == participant_index)
            .map(ChunkSpec::unit_count)
            .sum()
    }

    /// Sum of every chunk's length.
    pub fn total_units(&self) -> u64 {
        self.chunks.iter().map(|c| u64::from(c.unit_count())).sum()
    }
}

/// Resolved sizes for one allocation request.
#[derive(Debug, Clone, Copy)]
struct Sizing {
    target: u32,
    calculation: u32,
    single_copy: u32,
    remap: Option<VirtualSizing>,
}

/// Allocate `resource` across `participant_count` participants.
///
/// `override_units` is a number of copies for whole-copy resources and an
/// absolute target for counter resources. It must be positive when given.
pub fn allocate(
    resource: &ResourceDescriptor,
    participant_count: u32,
    override_units: Option<i64>,
) -> Result<Allocation> {
    if participant_count < 1 {
        return Err(Error::InvalidInput(
            "participant count must be at least 1".to_string(),
        ));
    }
    if participant_count > MAX_PARTICIPANTS {
        return Err(Error::InvalidInput(format!(
            "participant count {participant_count} exceeds {MAX_PARTICIPANTS}"
        )));
    }
    if resource.total_units < 1 {
        return Err(Error::InvalidInput(format!(
            "resource {} has no units",
            resource.code
        )));
    }

    let requested = match override_units {
        None => None,
        Some(n) if n <= 0 => {
            return Err(Error::InvalidInput(format!(
                "override for {} must be positive, got {n}",
                resource.code
            )));
        }
        Some(n) => Some(u32::try_from(n).map_err(|_| {
            Error::InvalidInput(format!("override for {} is too large: {n}", resource.code))
        })?),
    };

    let sizing = resolve_sizing(resource, requested)?;
    let progress_tracked = resource.variant.tracks_progress();

    let (mode, chunks) = if resource.variant == Variant::Joint {
        let chunks = (1..=participant_count)
            .map(|participant_index| ChunkSpec {
                participant_index,
                start_unit: 1,
                end_unit: sizing.target,
                progress: Some(sizing.target),
            })
            .collect();
        (Mode::Joint, chunks)
    } else {
        let shares = shares(sizing.calculation, participant_count);
        match resource.effective_scaling() {
            Scaling::Counter => (Mode::Linear, lay_out_linear(&shares, progress_tracked)),
            Scaling::WholeCopy => (
                Mode::Wrapping,
                lay_out_wrapping(&shares, &sizing, resource.total_units, progress_tracked),
            ),
        }
    };

    Ok(Allocation {
        resource_id: resource.id,
        mode,
        target_units: sizing.target,
        calculation_units: sizing.calculation,
        chunks,
    })
}

fn resolve_sizing(resource: &ResourceDescriptor, requested: Option<u32>) -> Result<Sizing> {
    let total = resource.total_units;
    let too_large = || {
        Error::InvalidInput(format!(
            "requested amount for {} overflows the unit range",
            resource.code
        ))
    };

    match resource.effective_scaling() {
        Scaling::Counter => {
            let target = requested.unwrap_or(total);
            Ok(Sizing {
                target,
                calculation: target,
                single_copy: target,
                remap: None,
            })
        }
        Scaling::WholeCopy => {
            let copies = requested.unwrap_or(1);
            let target = total.checked_mul(copies).ok_or_else(too_large)?;
            match resource.virtual_sizing {
                Some(vs) if resource.variant != Variant::Joint => {
                    validate_virtual_sizing(vs, total)?;
                    Ok(Sizing {
                        target,
                        calculation: vs.virtual_units.checked_mul(copies).ok_or_else(too_large)?,
                        single_copy: vs.virtual_units,
                        remap: Some(vs),
                    })
                }
                _ => Ok(Sizing {
                    target,
                    calculation: target,
                    single_copy: total,
                    remap: None,
                }),
            }
        }
    }
}

/// Check that a virtual sizing can be stretched onto `real_units`.
pub fn validate_virtual_sizing(sizing: VirtualSizing, real_units: u32) -> Result<()> {
    if sizing.linear_boundary >= sizing.virtual_units {
        return Err(Error::InvalidInput(format!(
            "linear boundary {} must be below virtual size {}",
            sizing.linear_boundary, sizing.virtual_units
        )));
    }
    if sizing.virtual_units > real_units {
        return Err(Error::InvalidInput(format!(
            "virtual size {} exceeds real size {real_units}",
            sizing.virtual_units
        )));
    }
    Ok(())
}

/// Fair ±1 split of `units` across `participant_count` slots.
///
/// The first `units % participant_count` slots get the larger share.
pub fn shares(units: u32, participant_count: u32) -> Vec<u32> {
    if participant_count == 0 {
        return Vec::new();
    }
    let base = units / participant_count;
    let remainder = units % participant_count;
    (0..participant_count)
        .map(|i| base + u32::from(i < remainder))
        .collect()
}

fn lay_out_linear(shares: &[u32], progress_tracked: bool) -> Vec<ChunkSpec> {
    let mut chunks = Vec::with_capacity(shares.len());
    // u64 so a target of u32::MAX can advance past its last unit. Shares
    // sum to the target, so every start and end fits in u32.
    let mut cursor = 1u64;
    for (i, &share) in shares.iter().enumerate() {
        // Slots with nothing to do get no chunk.
        if share == 0 {
            continue;
        }
        let end = cursor + u64::from(share) - 1;
        chunks.push(ChunkSpec {
            participant_index: i as u32 + 1,
            start_unit: cursor as u32,
            end_unit: end as u32,
            progress: progress_tracked.then_some(share),
        });
        cursor = end + 1;
    }
    chunks
}

fn lay_out_wrapping(
    shares: &[u32],
    sizing: &Sizing,
    real_copy_units: u32,
    progress_tracked: bool,
) -> Vec<ChunkSpec> {
    let copy = sizing.single_copy;
    let mut chunks = Vec::with_capacity(shares.len());
    // Cumulative position over all copies, 1-based. u64 so the final
    // advance past the last unit cannot overflow.
    let mut cursor = 1u64;

    for (i, &share) in shares.iter().enumerate() {
        let mut remaining = share;
        while remaining > 0 {
            let local_start = ((cursor - 1) % u64::from(copy)) as u32 + 1;
            let room = copy - local_start + 1;
            let len = remaining.min(room);
            let local_end = local_start + len - 1;

            let (start_unit, end_unit) = match sizing.remap {
                Some(vs) => remap_range(local_start, local_end, vs, real_copy_units),
                None => (local_start, local_end),
            };

            chunks.push(ChunkSpec {
                participant_index: i as u32 + 1,
                start_unit,
                end_unit,
                progress: progress_tracked.then_some(end_unit - start_unit + 1),
            });

            remaining -= len;
            cursor += u64::from(len);
        }
    }
    chunks
}

/// Map one virtual position onto the real unit space.
///
/// Positions up to the linear boundary are unchanged. Beyond it,
/// `real = boundary + round((virtual - boundary) * real_tail / virtual_tail)`
/// with halves rounded up.
pub fn remap(virtual_unit: u32, sizing: VirtualSizing, real_units: u32) -> u32 {
    let boundary = sizing.linear_boundary;
    if virtual_unit <= boundary {
        return virtual_unit;
    }
    let offset = u64::from(virtual_unit - boundary);
    let real_tail = u64::from(real_units - boundary);
    let virtual_tail = u64::from(sizing.virtual_units - boundary);
    let scaled = (2 * offset * real_tail + virtual_tail) / (2 * virtual_tail);
    boundary + scaled as u32
}

/// Map a virtual range `[start, end]` within one copy onto real units.
///
/// The end maps to the unit just before the real start of `end + 1`, so
/// adjacent virtual ranges stay adjacent and the ranges of one copy tile
/// `[1, real_units]` with no gaps.
pub fn remap_range(start: u32, end: u32, sizing: VirtualSizing, real_units: u32) -> (u32, u32) {
    let real_start = remap(start, sizing, real_units);
    let real_end = if end >= sizing.virtual_units {
        real_units
    } else {
        remap(end + 1, sizing, real_units) - 1
    };
    (real_start, real_end)
}

#[cfg(test)]
mod tests {
    use super::*;

    const QURAN: VirtualSizing = VirtualSizing {
        virtual_units: 600,
        linear_boundary: 580,
    };

    fn ranges(alloc: &Allocation, participant: u32) -> Vec<(u32, u32)> {
        alloc
            .chunks
            .iter()
            .filter(|c| c.participant_index == participant)
            .map(|c| (c.start_unit, c.end_unit))
            .collect()
    }

    #[test]
    fn shares_differ_by_at_most_one() {
        assert_eq!(shares(604, 5), vec![121, 121, 121, 121, 120]);
        assert_eq!(shares(200, 3), vec![67, 67, 66]);
        assert_eq!(shares(2, 4), vec![1, 1, 0, 0]);
        assert!(shares(10, 0).is_empty());
    }

    #[test]
    fn remap_is_identity_up_to_boundary() {
        for v in [1, 2, 300, 579, 580] {
            assert_eq!(remap(v, QURAN, 604), v);
        }
    }

    #[test]
    fn remap_stretches_the_tail() {
        assert_eq!(remap(581, QURAN, 604), 581);
        assert_eq!(remap(582, QURAN, 604), 582);
        assert_eq!(remap(583, QURAN, 604), 584);
        assert_eq!(remap(590, QURAN, 604), 592);
        assert_eq!(remap(600, QURAN, 604), 604);
    }

    #[test]
    fn remap_is_strictly_increasing() {
        let mut prev = 0;
        for v in 1..=600 {
            let r = remap(v, QURAN, 604);
            assert!(r > prev, "remap({v}) = {r} not above {prev}");
            prev = r;
        }
    }

    #[test]
    fn remapped_ranges_tile_the_real_copy() {
        // Split the virtual copy into 1-unit ranges; the real ranges must
        // cover 1..=604 without gaps or overlaps.
        let mut next = 1;
        for v in 1..=600 {
            let (s, e) = remap_range(v, v, QURAN, 604);
            assert_eq!(s, next, "gap before virtual unit {v}");
            assert!(e >= s);
            next = e + 1;
        }
        assert_eq!(next, 605);
    }

    #[test]
    fn rejects_zero_participants() {
        let r = ResourceDescriptor::new(1, "X", Variant::Countable, 10);
        assert!(matches!(allocate(&r, 0, None), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn rejects_too_many_participants() {
        let r = ResourceDescriptor::new(1, "X", Variant::Joint, 10);
        assert!(allocate(&r, MAX_PARTICIPANTS, None).is_ok());
        assert!(matches!(
            allocate(&r, MAX_PARTICIPANTS + 1, None),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(allocate(&r, u32::MAX, None), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn rejects_non_positive_override() {
        let r = ResourceDescriptor::new(1, "X", Variant::Countable, 10);
        assert!(matches!(allocate(&r, 2, Some(0)), Err(Error::InvalidInput(_))));
        assert!(matches!(allocate(&r, 2, Some(-3)), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn rejects_copy_overflow() {
        let r = ResourceDescriptor::new(1, "X", Variant::ListBased, 1_000_000);
        let err = allocate(&r, 2, Some(1_000_000)).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn linear_split_of_604_units() {
        let r = ResourceDescriptor::new(1, "COUNT", Variant::Countable, 604);
        let alloc = allocate(&r, 5, None).unwrap();
        assert_eq!(alloc.mode, Mode::Linear);
        let got: Vec<_> = alloc
            .chunks
            .iter()
            .map(|c| (c.start_unit, c.end_unit, c.progress))
            .collect();
        assert_eq!(
            got,
            vec![
                (1, 121, Some(121)),
                (122, 242, Some(121)),
                (243, 363, Some(121)),
                (364, 484, Some(121)),
                (485, 604, Some(120)),
            ]
        );
    }

    #[test]
    fn linear_skips_empty_shares() {
        let r = ResourceDescriptor::new(1, "TINY", Variant::Countable, 2);
        let alloc = allocate(&r, 5, None).unwrap();
        assert_eq!(alloc.chunks.len(), 2);
        assert!(alloc.chunks.iter().all(|c| c.unit_count() == 1));
    }

    #[test]
    fn linear_target_can_reach_the_top_of_the_unit_range() {
        let r = ResourceDescriptor::new(1, "C", Variant::Countable, 1);
        let alloc = allocate(&r, 3, Some(i64::from(u32::MAX))).unwrap();
        assert_eq!(alloc.target_units, u32::MAX);
        assert_eq!(alloc.total_units(), u64::from(u32::MAX));
        assert_eq!(alloc.chunks.last().unwrap().end_unit, u32::MAX);
        assert_eq!(ranges(&alloc, 2), vec![(1_431_655_766, 2_863_311_530)]);

        let single = allocate(&r, 1, Some(i64::from(u32::MAX))).unwrap();
        assert_eq!(ranges(&single, 1), vec![(1, u32::MAX)]);
    }

    #[test]
    fn counter_override_is_absolute_target() {
        let r = ResourceDescriptor::new(9, "MUNCIYE", Variant::Countable, 1000);
        let alloc = allocate(&r, 4, Some(250)).unwrap();
        assert_eq!(alloc.target_units, 250);
        assert_eq!(alloc.total_units(), 250);
        assert_eq!(ranges(&alloc, 4), vec![(189, 250)]);
    }

    #[test]
    fn joint_gives_everyone_the_full_target() {
        let r = ResourceDescriptor::new(4, "FETIH", Variant::Joint, 1);
        let alloc = allocate(&r, 3, Some(1000)).unwrap();
        assert_eq!(alloc.mode, Mode::Joint);
        assert_eq!(alloc.chunks.len(), 3);
        for (i, c) in alloc.chunks.iter().enumerate() {
            assert_eq!(c.participant_index, i as u32 + 1);
            assert_eq!((c.start_unit, c.end_unit), (1, 1000));
            assert_eq!(c.progress, Some(1000));
        }
    }

    #[test]
    fn wrapping_splits_at_copy_boundary() {
        let r = ResourceDescriptor::new(2, "LIST", Variant::ListBased, 100);
        let alloc = allocate(&r, 3, Some(2)).unwrap();
        assert_eq!(alloc.mode, Mode::Wrapping);
        assert_eq!(alloc.target_units, 200);
        assert_eq!(ranges(&alloc, 1), vec![(1, 67)]);
        assert_eq!(ranges(&alloc, 2), vec![(68, 100), (1, 34)]);
        assert_eq!(ranges(&alloc, 3), vec![(35, 100)]);
        assert!(alloc.chunks.iter().all(|c| c.progress.is_none()));
    }

    #[test]
    fn wrapping_share_can_span_several_copies() {
        let r = ResourceDescriptor::new(7, "UHUD", Variant::ListBased, 70);
        let alloc = allocate(&r, 2, Some(5)).unwrap();
        // 350 units, 175 each; participant 1 covers copies 1, 2 and half of 3.
        assert_eq!(ranges(&alloc, 1), vec![(1, 70), (1, 70), (1, 35)]);
        assert_eq!(ranges(&alloc, 2), vec![(36, 70), (1, 70), (1, 70)]);
    }

    #[test]
    fn non_wrapping_whole_copy_resource_can_be_forced_linear() {
        let r = ResourceDescriptor::new(3, "PLAIN", Variant::ListBased, 133).scaling(Scaling::Counter);
        let alloc = allocate(&r, 2, None).unwrap();
        assert_eq!(alloc.mode, Mode::Linear);
        assert_eq!(ranges(&alloc, 2), vec![(68, 133)]);
        assert!(alloc.chunks.iter().all(|c| c.progress.is_none()));
    }

    #[test]
    fn virtual_sizing_covers_every_real_page() {
        let r = ResourceDescriptor::new(1, "QURAN", Variant::Paged, 604).virtual_sizing(600, 580);
        for n in [1, 2, 3, 7, 30, 31, 100] {
            let alloc = allocate(&r, n, None).unwrap();
            assert_eq!(alloc.calculation_units, 600);
            assert_eq!(alloc.total_units(), 604, "participants = {n}");
        }
    }

    #[test]
    fn virtual_sizing_with_thirty_participants_keeps_juz_boundaries() {
        let r = ResourceDescriptor::new(1, "QURAN", Variant::Paged, 604).virtual_sizing(600, 580);
        let alloc = allocate(&r, 30, None).unwrap();
        assert_eq!(ranges(&alloc, 1), vec![(1, 20)]);
        assert_eq!(ranges(&alloc, 29), vec![(561, 580)]);
        assert_eq!(ranges(&alloc, 30), vec![(581, 604)]);
    }

    #[test]
    fn virtual_sizing_with_copies_wraps_per_copy() {
        let r = ResourceDescriptor::new(1, "QURAN", Variant::Paged, 604).virtual_sizing(600, 580);
        let alloc = allocate(&r, 4, Some(2)).unwrap();
        assert_eq!(alloc.target_units, 1208);
        assert_eq!(alloc.calculation_units, 1200);
        assert_eq!(alloc.total_units(), 1208);
        assert_eq!(ranges(&alloc, 2), vec![(301, 604)]);
        assert_eq!(ranges(&alloc, 3), vec![(1, 300)]);
    }

    #[test]
    fn invalid_virtual_sizing_is_rejected() {
        let r = ResourceDescriptor::new(1, "BAD", Variant::Paged, 500).virtual_sizing(600, 580);
        assert!(matches!(allocate(&r, 2, None), Err(Error::InvalidInput(_))));
    }
}
