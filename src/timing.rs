/*!
 * One timing run: a batch of trials reduced to a candidate byte and an
 * uncertainty.
 */

use crate::cache::REGIONS;
use crate::calibrate::Cutoff;
use crate::channel::{trial, ProbeChannel, ProbeOrder};
use crate::config::{Tuning, FIRST_CANDIDATE_REGION};

/**
 * The verdict of one timing run.
 *
 * `candidate` is `None` when no eligible region ever hit. `uncertainty` is a
 * heuristic probability that the candidate is wrong, not a posterior.
 */
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    pub candidate: Option<u8>,
    pub uncertainty: f64,
}

/// Per-region hit/miss tallies of one run and their assessment.
#[derive(Debug, Clone)]
pub struct TrialOutcome {
    pub hits: [u32; REGIONS],
    pub misses: [u32; REGIONS],
    pub assessment: Assessment,
}

/**
 * Pick the winning region and score it.
 *
 * The winner is the eligible region with the most hits, lowest index on ties.
 * Its uncertainty starts at `p_accidental ^ hits`, and every other eligible
 * region that hit at all erodes it: `u = 1 - (1 - u) * p_accidental ^ hits`.
 * With no winner the uncertainty is `p_no_signal ^ iterations`.
 */
pub fn assess(hits: &[u32; REGIONS], tuning: &Tuning) -> Assessment {
    let mut best : Option<usize> = None;
    for region in FIRST_CANDIDATE_REGION..REGIONS {
        let better = match best {
            None => hits[region] > 0,
            Some(b) => hits[region] > hits[b],
        };
        if better {
            best = Some(region);
        }
    }

    let Some(best) = best else {
        return Assessment {
            candidate: None,
            uncertainty: tuning.p_no_signal.powi(tuning.iterations as i32),
        };
    };

    let mut uncertainty = tuning.p_accidental.powi(hits[best] as i32);
    for region in FIRST_CANDIDATE_REGION..REGIONS {
        if region != best && hits[region] > 0 {
            uncertainty = 1.0 - (1.0 - uncertainty) * tuning.p_accidental.powi(hits[region] as i32);
        }
    }

    Assessment { candidate: Some(best as u8), uncertainty }
}

/**
 * Run `tuning.iterations` trials against `address` and classify every
 * region of every trial as a hit or a miss.
 *
 * # Arguments
 * * `channel`: The channel to drive.
 * * `address`: Byte to leak.
 * * `cutoff`: Calibrated hit/miss threshold.
 * * `tuning`: Iteration count, probe order and the probability priors.
 */
pub fn run_once<C: ProbeChannel>(channel: &mut C, address: usize, cutoff: Cutoff, tuning: &Tuning) -> TrialOutcome {
    let mut hits = [0u32; REGIONS];
    let mut misses = [0u32; REGIONS];
    let mut order = ProbeOrder::new(tuning.shuffle);
    let mut times = [0u64; REGIONS];

    for _ in 0..tuning.iterations {
        trial(channel, address, &mut order, &mut times);
        for (region, &t) in times.iter().enumerate() {
            if cutoff.is_hit(t) {
                hits[region] += 1;
            } else {
                misses[region] += 1;
            }
        }
    }

    let assessment = assess(&hits, tuning);
    TrialOutcome { hits, misses, assessment }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimulatedChannel, HIT_CYCLES, MISS_CYCLES};

    fn sim_cutoff() -> Cutoff {
        Cutoff::from_cycles((HIT_CYCLES + MISS_CYCLES) / 2)
    }

    #[test]
    fn single_region_hit_every_trial() {
        let tuning = Tuning::default();
        let mut channel = SimulatedChannel::new(0x7000, vec![0xA5]);
        let outcome = run_once(&mut channel, 0x7000, sim_cutoff(), &tuning);

        assert_eq!(outcome.assessment.candidate, Some(0xA5));
        assert_eq!(outcome.assessment.uncertainty, tuning.p_accidental.powi(tuning.iterations as i32));
        assert_eq!(outcome.hits[0xA5], tuning.iterations as u32);
        assert_eq!(outcome.misses[0xA5], 0);
        assert_eq!(outcome.misses[0xA6], tuning.iterations as u32);
    }

    #[test]
    fn region_zero_never_wins() {
        let tuning = Tuning::default();
        let mut channel = SimulatedChannel::new(0x7000, vec![0x00]);
        let outcome = run_once(&mut channel, 0x7000, sim_cutoff(), &tuning);

        assert_eq!(outcome.hits[0], tuning.iterations as u32);
        assert_eq!(outcome.assessment.candidate, None);
        assert_eq!(outcome.assessment.uncertainty, 0.99f64.powi(500));
    }

    #[test]
    fn ties_go_to_the_lowest_region() {
        let tuning = Tuning::default();
        let mut hits = [0u32; REGIONS];
        hits[9] = 4;
        hits[3] = 4;
        hits[200] = 2;
        let assessment = assess(&hits, &tuning);
        assert_eq!(assessment.candidate, Some(3));
    }

    #[test]
    fn competing_regions_erode_confidence() {
        let tuning = Tuning::default();
        let p = tuning.p_accidental;
        let mut hits = [0u32; REGIONS];
        hits[0] = 500;
        hits[7] = 10;
        hits[8] = 2;
        hits[9] = 1;

        let mut expected = p.powi(10);
        expected = 1.0 - (1.0 - expected) * p.powi(2);
        expected = 1.0 - (1.0 - expected) * p.powi(1);

        let assessment = assess(&hits, &tuning);
        assert_eq!(assessment.candidate, Some(7));
        assert_eq!(assessment.uncertainty, expected);
        assert!(assessment.uncertainty > p.powi(10));
    }

    #[test]
    fn a_miss_everywhere_is_no_candidate() {
        let tuning = Tuning { iterations: 20, ..Tuning::default() };
        let assessment = assess(&[0u32; REGIONS], &tuning);
        assert_eq!(assessment, Assessment { candidate: None, uncertainty: 0.99f64.powi(20) });
    }

    #[test]
    fn inaccessible_target_without_leak_has_no_candidate() {
        let tuning = Tuning { iterations: 50, ..Tuning::default() };
        let mut channel = SimulatedChannel::new(0x7000, vec![0x11]);
        let outcome = run_once(&mut channel, 0xdead_0000, sim_cutoff(), &tuning);
        assert_eq!(outcome.assessment.candidate, None);
        assert_eq!(channel.triggers(), 50);
    }
}
