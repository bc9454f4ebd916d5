//! Allocation properties over every built-in resource and many group sizes.

use recite_circle::allocation::{Allocation, Mode, allocate, shares};
use recite_circle::catalog::Catalog;
use recite_circle::model::ResourceDescriptor;

const OVERRIDES: [Option<i64>; 4] = [None, Some(2), Some(3), Some(7)];

fn each_allocation(mut check: impl FnMut(&ResourceDescriptor, u32, Option<i64>, &Allocation)) {
    let catalog = Catalog::builtin();
    for resource in catalog.all() {
        for n in 1..=40 {
            for override_units in OVERRIDES {
                let allocation = allocate(resource, n, override_units).unwrap();
                check(resource, n, override_units, &allocation);
            }
        }
    }
}

#[test]
fn chunk_lengths_sum_to_target() {
    each_allocation(|resource, n, _, allocation| {
        if allocation.mode == Mode::Joint {
            assert_eq!(allocation.chunks.len() as u32, n, "{}", resource.code);
            for c in &allocation.chunks {
                assert_eq!((c.start_unit, c.end_unit), (1, allocation.target_units));
                assert_eq!(c.progress, Some(allocation.target_units));
            }
        } else {
            assert_eq!(
                allocation.total_units(),
                u64::from(allocation.target_units),
                "{} with {n} participants",
                resource.code
            );
        }
    });
}

#[test]
fn chunks_are_never_empty_and_stay_in_range() {
    each_allocation(|resource, _, _, allocation| {
        // Wrapped chunks address one copy; the others address the target.
        let upper = match allocation.mode {
            Mode::Wrapping => resource.total_units,
            Mode::Linear | Mode::Joint => allocation.target_units,
        };
        for c in &allocation.chunks {
            assert!(c.start_unit >= 1, "{}: {c:?}", resource.code);
            assert!(c.start_unit <= c.end_unit, "{}: {c:?}", resource.code);
            assert!(c.end_unit <= upper, "{}: {c:?}", resource.code);
        }
    });
}

#[test]
fn shares_are_fair_and_front_loaded() {
    for units in [1u32, 7, 100, 133, 600, 604, 4444] {
        for n in 1..=50 {
            let s = shares(units, n);
            assert_eq!(s.len() as u32, n);
            assert_eq!(s.iter().sum::<u32>(), units);
            let max = *s.iter().max().unwrap();
            let min = *s.iter().min().unwrap();
            assert!(max - min <= 1);
            // Larger shares come first.
            assert!(s.windows(2).all(|w| w[0] >= w[1]));
            assert_eq!(
                s.iter().filter(|&&x| x == max).count() as u32,
                if units % n == 0 { n } else { units % n }
            );
        }
    }
}

#[test]
fn unremapped_participants_hold_their_share() {
    each_allocation(|resource, n, _, allocation| {
        if allocation.mode == Mode::Joint || resource.virtual_sizing.is_some() {
            return;
        }
        let expected = shares(allocation.calculation_units, n);
        for (i, share) in expected.iter().enumerate() {
            assert_eq!(
                allocation.units_for(i as u32 + 1),
                *share,
                "{} participant {}",
                resource.code,
                i + 1
            );
        }
    });
}

#[test]
fn wrapped_sub_chunks_continue_across_copy_boundaries() {
    each_allocation(|resource, _, _, allocation| {
        if allocation.mode != Mode::Wrapping {
            return;
        }
        let copy = resource.total_units;
        // Every chunk starts right after the previous one, wrapping to 1.
        let mut expected_start = 1;
        for c in &allocation.chunks {
            assert_eq!(c.start_unit, expected_start, "{}: {c:?}", resource.code);
            expected_start = if c.end_unit == copy { 1 } else { c.end_unit + 1 };
        }
        // Sub-chunks of one participant only split at a copy boundary.
        for pair in allocation.chunks.windows(2) {
            if pair[0].participant_index == pair[1].participant_index {
                assert_eq!(pair[0].end_unit, copy);
                assert_eq!(pair[1].start_unit, 1);
            }
        }
    });
}

#[test]
fn counted_variants_start_with_full_progress() {
    each_allocation(|resource, _, _, allocation| {
        for c in &allocation.chunks {
            if resource.variant.tracks_progress() {
                assert_eq!(c.progress, Some(c.unit_count()));
            } else {
                assert_eq!(c.progress, None);
            }
        }
    });
}

#[test]
fn quran_copies_cover_every_page() {
    let catalog = Catalog::builtin();
    let quran = catalog.by_code("QURAN").unwrap();
    for copies in 1..=3i64 {
        for n in [1, 5, 20, 30, 61] {
            let allocation = allocate(quran, n, Some(copies)).unwrap();
            // Count how often each page is assigned.
            let mut hits = vec![0u32; 605];
            for c in &allocation.chunks {
                for page in c.start_unit..=c.end_unit {
                    hits[page as usize] += 1;
                }
            }
            assert!(
                hits[1..].iter().all(|&h| h == copies as u32),
                "copies={copies} n={n}"
            );
        }
    }
}
