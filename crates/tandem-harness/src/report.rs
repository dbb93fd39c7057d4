use crate::compare::{ComparisonResult, Divergence, LaneWidth, Mismatch};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::Path;
use tandem_arch::IsaProfile;

/// At most this many byte-level memory mismatches are rendered; the rest
/// are summarized by count.
const MEMORY_DIFF_LIMIT: usize = 16;

impl fmt::Display for Divergence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "state divergence ({} mismatches):", self.mismatches.len())?;
        let mut memory_shown = 0usize;
        let memory_total = self
            .mismatches
            .iter()
            .filter(|m| matches!(m, Mismatch::Memory { .. }))
            .count();

        for mismatch in &self.mismatches {
            if let Mismatch::Memory { .. } = mismatch {
                memory_shown += 1;
                if memory_shown > MEMORY_DIFF_LIMIT {
                    continue;
                }
            }
            write_mismatch(f, self.profile, mismatch)?;
        }

        if memory_total > MEMORY_DIFF_LIMIT {
            writeln!(
                f,
                "  ... and {} more memory mismatches",
                memory_total - MEMORY_DIFF_LIMIT
            )?;
        }
        Ok(())
    }
}

fn write_mismatch(
    f: &mut fmt::Formatter<'_>,
    profile: IsaProfile,
    mismatch: &Mismatch,
) -> fmt::Result {
    let (prefix, width) = match profile {
        IsaProfile::Aarch64 => ("x", 18),
        IsaProfile::Aarch32 => ("r", 10),
    };
    match mismatch {
        Mismatch::Gpr {
            index,
            translator,
            reference,
        } => writeln!(
            f,
            "  {prefix}{index}: translator={translator:#0width$x} reference={reference:#0width$x}"
        ),
        Mismatch::Sp {
            translator,
            reference,
        } => writeln!(
            f,
            "  sp: translator={translator:#0width$x} reference={reference:#0width$x}"
        ),
        Mismatch::Vreg {
            index,
            translator,
            reference,
        } => writeln!(
            f,
            "  v{index}: translator={translator} reference={reference}"
        ),
        Mismatch::VregLane {
            lane,
            width: lane_width,
            translator,
            reference,
            ulp,
        } => {
            let (name, hexw) = match lane_width {
                LaneWidth::Single => ("single", 10),
                LaneWidth::Double => ("double", 18),
            };
            write!(
                f,
                "  v0[{lane}] ({name}): translator={translator:#0hexw$x} reference={reference:#0hexw$x}"
            )?;
            match ulp {
                Some(d) => writeln!(f, " ({d} ulps apart)"),
                None => writeln!(f, " (ulp distance undefined)"),
            }
        }
        Mismatch::Flag {
            flag,
            translator,
            reference,
        } => writeln!(
            f,
            "  flag {}: translator={} reference={}",
            flag.name(),
            *translator as u8,
            *reference as u8
        ),
        Mismatch::Fpcr {
            translator,
            reference,
        } => writeln!(
            f,
            "  fpcr: translator={translator:?} reference={reference:?}"
        ),
        Mismatch::Fpsr {
            translator,
            reference,
            mask,
        } => writeln!(
            f,
            "  fpsr: translator={:#010x} reference={:#010x} (mask {:#010x})",
            translator.bits(),
            reference.bits(),
            mask.bits()
        ),
        Mismatch::Memory {
            offset,
            addr,
            translator,
            reference,
        } => writeln!(
            f,
            "  data+{offset:#06x} ({addr:#x}): translator={translator:02x} reference={reference:02x}"
        ),
    }
}

/// Aggregated tallies for a whole run of harness invocations.
///
/// Inconclusive outcomes are counted separately, per reason, so a suite can
/// report how much of its coverage landed on implementation-defined
/// semantics rather than folding those cases into pass or fail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuiteReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub inconclusive: usize,
    pub skips: BTreeMap<String, usize>,
}

impl SuiteReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, result: &ComparisonResult) {
        self.total += 1;
        match result {
            ComparisonResult::Pass => self.passed += 1,
            ComparisonResult::Fail(_) => self.failed += 1,
            ComparisonResult::Inconclusive(reason) => {
                self.inconclusive += 1;
                *self.skips.entry(reason.to_string()).or_insert(0) += 1;
            }
        }
    }

    pub fn print_summary(&self) {
        eprintln!(
            "lockstep: {} cases, {} passed, {} failed, {} inconclusive",
            self.total, self.passed, self.failed, self.inconclusive
        );
        for (reason, count) in &self.skips {
            eprintln!("  inconclusive ({reason}): {count}");
        }
    }

    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        std::fs::write(path, contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::SkipReason;

    fn divergence(mismatches: Vec<Mismatch>) -> Divergence {
        Divergence {
            profile: IsaProfile::Aarch64,
            mismatches,
        }
    }

    #[test]
    fn display_names_registers_and_flags() {
        let text = divergence(vec![
            Mismatch::Gpr {
                index: 5,
                translator: 0xBAD,
                reference: 0,
            },
            Mismatch::Flag {
                flag: tandem_arch::PStateFlag::Overflow,
                translator: true,
                reference: false,
            },
        ])
        .to_string();
        assert!(text.contains("x5: translator=0x0000000000000bad"), "{text}");
        assert!(text.contains("flag V: translator=1 reference=0"), "{text}");
    }

    #[test]
    fn display_caps_memory_diffs() {
        let mismatches = (0..40)
            .map(|i| Mismatch::Memory {
                offset: i,
                addr: 0x2000 + i,
                translator: 0,
                reference: 1,
            })
            .collect();
        let text = divergence(mismatches).to_string();
        assert!(text.contains("and 24 more memory mismatches"), "{text}");
    }

    #[test]
    fn lane_mismatch_reports_ulp_distance() {
        let text = divergence(vec![Mismatch::VregLane {
            lane: 2,
            width: LaneWidth::Single,
            translator: 0x3FC0_0001,
            reference: 0x3FC0_0004,
            ulp: Some(3),
        }])
        .to_string();
        assert!(text.contains("v0[2] (single)"), "{text}");
        assert!(text.contains("(3 ulps apart)"), "{text}");
    }

    #[test]
    fn suite_report_tallies_and_round_trips() {
        let mut report = SuiteReport::new();
        report.record(&ComparisonResult::Pass);
        report.record(&ComparisonResult::Pass);
        report.record(&ComparisonResult::Inconclusive(SkipReason::NanSingle));
        report.record(&ComparisonResult::Fail(divergence(vec![])));

        assert_eq!(report.total, 4);
        assert_eq!(report.passed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.inconclusive, 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("suite.json");
        report.write_json(&path).unwrap();
        let parsed: SuiteReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.total, 4);
        assert_eq!(parsed.skips.len(), 1);
    }
}
