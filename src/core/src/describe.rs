//! Builds the filename suffix describing why an input was kept (§4.E).

use crate::error::CoreError;
use crate::virgin::{FewBitsOutcome, Novelty};

/// Signed stage value, and whether it should render with a `be:` prefix
/// (big-endian multi-byte mutation) as the original `describe_op` does.
#[derive(Debug, Clone, Copy)]
pub enum StageVal {
    Plain(i64),
    BigEndian(i64),
}

/// The ambient fuzzer state `describe_op` reads to build a filename: which
/// source entry this mutation descends from, which stage produced it,
/// and where in the input the mutation landed.
#[derive(Debug, Clone)]
pub struct StageInfo {
    pub source_entry: u32,
    pub splicing_with: Option<i32>,
    pub syncing_party: Option<String>,
    pub syncing_case: u32,
    pub stage_short: String,
    pub stage_cur_byte: Option<i64>,
    pub stage_val: Option<StageVal>,
    pub stage_cur_rep: i32,
    pub elapsed_ms: u64,
    pub total_execs: u64,
}

fn tag_for(outcome: FewBitsOutcome) -> Option<&'static str> {
    match outcome {
        FewBitsOutcome::Fallback(Novelty::NewTuple) => Some("+cov"),
        FewBitsOutcome::Fallback(_) => None,
        FewBitsOutcome::Decrease(axes) => match axes.tag() {
            0x11 => Some("-xxh"),
            0x12 => Some("-xcx"),
            0x13 => Some("-xch"),
            0x14 => Some("-bxx"),
            0x15 => Some("-bxh"),
            0x16 => Some("-bcx"),
            0x17 => Some("-bch"),
            _ => None,
        },
    }
}

/// Construct a filename suffix capturing the operation that discovered
/// this input. Mirrors `describe_op`'s field order: `src:`/`sync:`,
/// `time:`/`execs:`, `op:`/`pos:`/`val:` (or `rep:`), then `+tout` if this
/// was a timeout, then the decrease/coverage tag from the table in §4.E.
///
/// Returns [`CoreError::DescribeOverflow`] (fatal, per §7) if the result
/// would exceed `max_description_len`.
pub fn build_description(
    outcome: FewBitsOutcome,
    is_timeout: bool,
    stage: &StageInfo,
    max_description_len: usize,
) -> Result<String, CoreError> {
    let mut out = String::new();

    if let Some(party) = &stage.syncing_party {
        out.push_str(&format!("sync:{},src:{:06}", party, stage.syncing_case));
    } else {
        out.push_str(&format!("src:{:06}", stage.source_entry));
        if let Some(splice) = stage.splicing_with {
            out.push_str(&format!("+{:06}", splice));
        }
        out.push_str(&format!(
            ",time:{},execs:{}",
            stage.elapsed_ms, stage.total_execs
        ));
        out.push_str(&format!(",op:{}", stage.stage_short));

        if let Some(pos) = stage.stage_cur_byte {
            out.push_str(&format!(",pos:{}", pos));
            match stage.stage_val {
                Some(StageVal::Plain(v)) => out.push_str(&format!(",val:{:+}", v)),
                Some(StageVal::BigEndian(v)) => out.push_str(&format!(",val:be:{:+}", v)),
                None => {}
            }
        } else {
            out.push_str(&format!(",rep:{}", stage.stage_cur_rep));
        }
    }

    if is_timeout {
        out.push_str(",+tout");
    }

    if let Some(tag) = tag_for(outcome) {
        out.push(',');
        out.push_str(tag);
    }

    if out.len() >= max_description_len {
        return Err(CoreError::DescribeOverflow {
            len: out.len(),
            max: max_description_len,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virgin::DecreaseAxes;

    fn base_stage() -> StageInfo {
        StageInfo {
            source_entry: 12,
            splicing_with: None,
            syncing_party: None,
            syncing_case: 0,
            stage_short: "havoc".to_string(),
            stage_cur_byte: Some(4),
            stage_val: Some(StageVal::Plain(-1)),
            stage_cur_rep: 0,
            elapsed_ms: 1000,
            total_execs: 42,
        }
    }

    #[test]
    fn renders_new_coverage_tag() {
        let desc = build_description(
            FewBitsOutcome::Fallback(Novelty::NewTuple),
            false,
            &base_stage(),
            256,
        )
        .unwrap();
        assert!(desc.contains("src:000012"));
        assert!(desc.contains("op:havoc"));
        assert!(desc.contains("pos:4"));
        assert!(desc.ends_with(",+cov"));
    }

    #[test]
    fn renders_each_decrease_tag() {
        let cases: &[(DecreaseAxes, &str)] = &[
            (DecreaseAxes { bitmap: false, coverage: false, hitcount: true }, "-xxh"),
            (DecreaseAxes { bitmap: false, coverage: true, hitcount: false }, "-xcx"),
            (DecreaseAxes { bitmap: false, coverage: true, hitcount: true }, "-xch"),
            (DecreaseAxes { bitmap: true, coverage: false, hitcount: false }, "-bxx"),
            (DecreaseAxes { bitmap: true, coverage: false, hitcount: true }, "-bxh"),
            (DecreaseAxes { bitmap: true, coverage: true, hitcount: false }, "-bcx"),
            (DecreaseAxes { bitmap: true, coverage: true, hitcount: true }, "-bch"),
        ];
        for (axes, tag) in cases {
            let desc =
                build_description(FewBitsOutcome::Decrease(*axes), false, &base_stage(), 256)
                    .unwrap();
            assert!(desc.ends_with(tag), "expected {desc} to end with {tag}");
        }
    }

    #[test]
    fn appends_timeout_marker_before_tag() {
        let desc = build_description(
            FewBitsOutcome::Decrease(DecreaseAxes { bitmap: false, coverage: false, hitcount: true }),
            true,
            &base_stage(),
            256,
        )
        .unwrap();
        assert!(desc.contains(",+tout,-xxh"));
    }

    #[test]
    fn overflow_is_fatal() {
        let err = build_description(
            FewBitsOutcome::Fallback(Novelty::None),
            false,
            &base_stage(),
            5,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::DescribeOverflow { .. }));
    }

    #[test]
    fn rep_used_when_no_stage_byte() {
        let mut stage = base_stage();
        stage.stage_cur_byte = None;
        stage.stage_cur_rep = 7;
        let desc = build_description(FewBitsOutcome::Fallback(Novelty::None), false, &stage, 256)
            .unwrap();
        assert!(desc.contains(",rep:7"));
    }
}
