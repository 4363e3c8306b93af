//! Resolution planning.
//!
//! Every song is wanted as an mp3 plus webm clips at 480p and 720p. Which
//! of those can be produced depends on the source height; which are still
//! needed depends on each song's status flags.

use shared::models::{Song, Status};
use std::fmt;

/// One step of the quality ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rung {
    Mp3,
    Video { resolution: u32, status: Status },
}

impl Rung {
    pub const RES_480: Rung = Rung::Video {
        resolution: 480,
        status: Status::RES_480,
    };
    pub const RES_720: Rung = Rung::Video {
        resolution: 720,
        status: Status::RES_720,
    };

    /// Flag set on a song once this rung has been produced
    pub fn status(&self) -> Status {
        match self {
            Rung::Mp3 => Status::MP3,
            Rung::Video { status, .. } => *status,
        }
    }

    pub fn resolution(&self) -> Option<u32> {
        match self {
            Rung::Mp3 => None,
            Rung::Video { resolution, .. } => Some(*resolution),
        }
    }
}

impl fmt::Display for Rung {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rung::Mp3 => write!(f, "mp3"),
            Rung::Video { resolution, .. } => write!(f, "{}p", resolution),
        }
    }
}

/// The ladder in priority order
pub const LADDER: [Rung; 3] = [Rung::Mp3, Rung::RES_480, Rung::RES_720];

/// Why a rung was left out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RungWarning {
    VideoInfoMissing { rung: Rung },
    SourceTooSmall { rung: Rung, height: u32 },
}

impl fmt::Display for RungWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RungWarning::VideoInfoMissing { rung } => {
                write!(f, "video info missing, cannot produce {}", rung)
            }
            RungWarning::SourceTooSmall { rung, height } => {
                write!(f, "source smaller than {} ({}p)", rung, height)
            }
        }
    }
}

/// Rungs that can be produced from a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RungPlan {
    pub rungs: Vec<Rung>,
    pub warnings: Vec<RungWarning>,
}

/// Work out the available rungs for a source `height` (`None` or 0 when unknown).
///
/// A source below every video rung still gets one video clip at its own
/// height; it is tracked with the 480p flag.
pub fn plan_rungs(height: Option<u32>) -> RungPlan {
    let height = height.filter(|h| *h > 0);
    let mut rungs = Vec::new();
    let mut warnings = Vec::new();

    for rung in LADDER {
        match (rung.resolution(), height) {
            (None, _) => rungs.push(rung),
            (Some(_), None) => warnings.push(RungWarning::VideoInfoMissing { rung }),
            (Some(resolution), Some(height)) if height >= resolution => rungs.push(rung),
            (Some(_), Some(height)) => warnings.push(RungWarning::SourceTooSmall { rung, height }),
        }
    }

    if let (Some(height), [Rung::Mp3]) = (height, rungs.as_slice()) {
        rungs.push(Rung::Video {
            resolution: height,
            status: Status::RES_480,
        });
    }

    RungPlan { rungs, warnings }
}

/// `(song, rung)` for every available rung a song does not have yet.
///
/// Rung-major: all mp3 work first, then each video rung.
pub fn required_jobs<'a>(plan: &RungPlan, songs: &[&'a Song]) -> Vec<(&'a Song, Rung)> {
    plan.rungs
        .iter()
        .flat_map(|rung| {
            songs
                .iter()
                .filter(move |song| song.is_missing(rung.status()))
                .map(move |song| (*song, *rung))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::scalars::SongTypeAndPosition;

    fn song(status: Status) -> Song {
        let mut song = Song::new("Again", "YUI", SongTypeAndPosition::opening(1));
        song.status = status;
        song
    }

    #[test]
    fn test_full_ladder() {
        let plan = plan_rungs(Some(1080));
        assert_eq!(plan.rungs, LADDER.to_vec());
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_mid_height() {
        let plan = plan_rungs(Some(576));
        assert_eq!(plan.rungs, vec![Rung::Mp3, Rung::RES_480]);
        assert_eq!(
            plan.warnings,
            vec![RungWarning::SourceTooSmall {
                rung: Rung::RES_720,
                height: 576
            }]
        );
        assert_eq!(plan.warnings[0].to_string(), "source smaller than 720p (576p)");
    }

    #[test]
    fn test_small_source_gets_synthetic_rung() {
        let plan = plan_rungs(Some(300));
        assert_eq!(
            plan.rungs,
            vec![
                Rung::Mp3,
                Rung::Video {
                    resolution: 300,
                    status: Status::RES_480
                }
            ]
        );
        assert_eq!(plan.warnings.len(), 2);
    }

    #[test]
    fn test_unknown_height() {
        for height in [None, Some(0)] {
            let plan = plan_rungs(height);
            assert_eq!(plan.rungs, vec![Rung::Mp3]);
            assert_eq!(
                plan.warnings,
                vec![
                    RungWarning::VideoInfoMissing { rung: Rung::RES_480 },
                    RungWarning::VideoInfoMissing { rung: Rung::RES_720 },
                ]
            );
        }
    }

    #[test]
    fn test_available_rungs_follow_height() {
        for height in 1..=1200u32 {
            let plan = plan_rungs(Some(height));
            let mut expected: Vec<Rung> = LADDER
                .iter()
                .copied()
                .filter(|rung| rung.resolution().map_or(true, |r| r <= height))
                .collect();
            if expected == [Rung::Mp3] {
                expected.push(Rung::Video {
                    resolution: height,
                    status: Status::RES_480,
                });
            }
            assert_eq!(plan.rungs, expected, "height {}", height);
        }
    }

    #[test]
    fn test_required_jobs_partial_completion() {
        let done = song(Status::MP3 | Status::RES_480);
        let jobs = required_jobs(&plan_rungs(Some(720)), &[&done]);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].1, Rung::RES_720);
    }

    #[test]
    fn test_required_jobs_rung_major_order() {
        let first = song(Status::NOT_SUBMITTED);
        let second = song(Status::SUBMITTED);
        let jobs = required_jobs(&plan_rungs(Some(480)), &[&first, &second]);

        let rungs: Vec<Rung> = jobs.iter().map(|(_, rung)| *rung).collect();
        assert_eq!(rungs, vec![Rung::Mp3, Rung::Mp3, Rung::RES_480, Rung::RES_480]);
        assert!(std::ptr::eq(jobs[0].0, &first));
        assert!(std::ptr::eq(jobs[1].0, &second));
    }

    #[test]
    fn test_synthetic_rung_uses_480_flag() {
        let done = song(Status::MP3 | Status::RES_480);
        assert!(required_jobs(&plan_rungs(Some(300)), &[&done]).is_empty());
    }
}
