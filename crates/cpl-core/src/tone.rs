//! Duration budget checks and the cheapest-first repair ladder.
//!
//! Everything here is pure: the ladder takes a slice of segments and returns
//! a freshly annotated copy plus the repair request for anything it could not
//! fix locally.

use serde::{Deserialize, Serialize};

use crate::lexicon::{filler_lexicon, scrub_fillers};
use crate::{Segment, SegmentId, ToneAction};

pub const DEFAULT_WPM: f64 = 150.0;
/// Largest overage fixed by speeding playback up.
pub const DEFAULT_RATE_TWEAK_MAX: f64 = 1.05;
/// Largest overage the filler scrub is allowed to attempt.
pub const DEFAULT_SCRUB_MAX: f64 = 1.10;
/// Overage tolerated after local remedies; anything above needs a rewrite.
pub const DEFAULT_HARD_CEILING: f64 = 1.10;

/// Ladder rungs in the order they are tried.
pub const LADDER: [ToneAction; 3] = [ToneAction::RateTweak, ToneAction::FillerScrub, ToneAction::Escalate];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToneBudget {
    #[serde(default = "default_wpm")]
    pub wpm: f64,
    #[serde(default = "default_rate_tweak_max")]
    pub rate_tweak_max: f64,
    #[serde(default = "default_scrub_max")]
    pub scrub_max: f64,
    #[serde(default = "default_hard_ceiling")]
    pub hard_ceiling: f64,
}

fn default_wpm() -> f64 {
    DEFAULT_WPM
}
fn default_rate_tweak_max() -> f64 {
    DEFAULT_RATE_TWEAK_MAX
}
fn default_scrub_max() -> f64 {
    DEFAULT_SCRUB_MAX
}
fn default_hard_ceiling() -> f64 {
    DEFAULT_HARD_CEILING
}

impl Default for ToneBudget {
    fn default() -> Self {
        Self {
            wpm: DEFAULT_WPM,
            rate_tweak_max: DEFAULT_RATE_TWEAK_MAX,
            scrub_max: DEFAULT_SCRUB_MAX,
            hard_ceiling: DEFAULT_HARD_CEILING,
        }
    }
}

impl ToneBudget {
    /// Rung for an estimate/target ratio. `None` means within budget. Only a
    /// ratio above both `scrub_max` and `hard_ceiling` escalates.
    pub fn rung_for(&self, ratio: f64) -> Option<ToneAction> {
        if ratio <= 1.0 {
            return None;
        }
        LADDER.into_iter().find(|rung| match rung {
            ToneAction::RateTweak => ratio <= self.rate_tweak_max,
            ToneAction::FillerScrub => ratio <= self.scrub_max.max(self.hard_ceiling),
            _ => true,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RepairItem {
    pub segment_id: SegmentId,
    pub kind: String,
    pub overage_sec: f64,
    pub ratio: f64,
}

/// Minimal request for the external rewrite step: only flagged segments.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RepairRequest {
    pub items: Vec<RepairItem>,
}

impl RepairRequest {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToneReport {
    pub segments: Vec<Segment>,
    pub repair: RepairRequest,
}

/// Drop inline control annotations: `[pause]`, `[rate:1.1]`, `<break/>`,
/// `{...}` blocks and `*`/`_` emphasis markers. A bracket that never closes
/// is ordinary text and is kept along with everything after it.
pub fn strip_annotations(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        let tail = &rest[c.len_utf8()..];
        let close = match c {
            '[' => Some(']'),
            '<' => Some('>'),
            '{' => Some('}'),
            _ => None,
        };
        match close.and_then(|close| tail.find(close).map(|at| &tail[at + close.len_utf8()..])) {
            Some(after) => {
                out.push(' ');
                rest = after;
                continue;
            }
            None => match c {
                '*' | '_' => {}
                _ => out.push(c),
            },
        }
        rest = tail;
    }
    out
}

pub fn count_words(text: &str) -> usize {
    text.split_whitespace()
        .filter(|t| t.chars().any(char::is_alphanumeric))
        .count()
}

/// Spoken duration in seconds at `wpm` words per minute.
pub fn estimate_duration(text: &str, wpm: f64) -> f64 {
    if wpm <= 0.0 {
        return 0.0;
    }
    count_words(&strip_annotations(text)) as f64 * 60.0 / wpm
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Run the ladder over every segment. Input segments are left untouched.
pub fn apply_ladder(segments: &[Segment], budget: &ToneBudget, language: &str) -> ToneReport {
    let lexicon = filler_lexicon(language);
    let mut repair = RepairRequest::default();
    let annotated = segments
        .iter()
        .map(|seg| {
            let out = assess(seg, budget, lexicon);
            if out.hints.needs_repair {
                if let Some(target) = out.target() {
                    let est = estimate_duration(&seg.text, budget.wpm);
                    repair.items.push(RepairItem {
                        segment_id: out.segment_id.clone(),
                        kind: out.kind.clone(),
                        overage_sec: round3(est - target),
                        ratio: round3(est / target),
                    });
                }
            }
            out
        })
        .collect();
    ToneReport { segments: annotated, repair }
}

fn assess(seg: &Segment, budget: &ToneBudget, lexicon: &[&str]) -> Segment {
    let mut out = seg.clone();
    if seg.hints.needs_human {
        return out;
    }

    let est = estimate_duration(&seg.text, budget.wpm);
    out.hints.estimated_sec = Some(est);
    out.hints.action = Some(ToneAction::Ok);
    out.hints.tts_rate = None;
    out.hints.needs_repair = false;

    if count_words(&strip_annotations(&seg.text)) == 0 {
        out.hints.needs_human = true;
        return out;
    }
    let Some(target) = seg.target() else {
        return out;
    };

    let ratio = est / target;
    match budget.rung_for(ratio) {
        None | Some(ToneAction::Ok) => {}
        Some(ToneAction::RateTweak) => {
            out.hints.action = Some(ToneAction::RateTweak);
            out.hints.tts_rate = Some(round3(ratio));
        }
        Some(ToneAction::FillerScrub) => {
            out.hints.action = Some(ToneAction::FillerScrub);
            let scrubbed = scrub_fillers(&seg.text, lexicon);
            if count_words(&strip_annotations(&scrubbed)) == 0 {
                // nothing left to narrate; keep the original for the rewrite step
                out.hints.needs_repair = true;
                return out;
            }
            let new_est = estimate_duration(&scrubbed, budget.wpm);
            let new_ratio = new_est / target;
            out.text = scrubbed;
            out.hints.estimated_sec = Some(new_est);
            if new_ratio > budget.hard_ceiling {
                out.hints.needs_repair = true;
            } else if new_ratio > 1.0 && new_ratio <= budget.rate_tweak_max {
                out.hints.tts_rate = Some(round3(new_ratio));
            }
        }
        Some(ToneAction::Escalate) => {
            out.hints.action = Some(ToneAction::Escalate);
            out.hints.needs_repair = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        vec!["word"; n].join(" ")
    }

    #[test]
    fn estimate_counts_words_at_wpm() {
        assert_eq!(estimate_duration(&words(150), 150.0), 60.0);
        assert_eq!(estimate_duration("", 150.0), 0.0);
        assert_eq!(estimate_duration("hello", 0.0), 0.0);
    }

    #[test]
    fn estimate_ignores_control_annotations() {
        let plain = "We ship today and celebrate";
        let marked = "We [pause] ship <break time=\"300ms\"/> *today* and {rate:1.1} celebrate";
        assert_eq!(estimate_duration(plain, 150.0), estimate_duration(marked, 150.0));
        assert_eq!(estimate_duration(marked, 150.0), estimate_duration(&strip_annotations(marked), 150.0));
    }

    #[test]
    fn estimate_is_monotonic_in_word_count() {
        let mut prev = 0.0;
        for n in 0..50 {
            let d = estimate_duration(&words(n), 140.0);
            assert!(d >= prev);
            prev = d;
        }
    }

    #[test]
    fn unset_target_is_always_ok_and_untouched() {
        let segs = vec![
            Segment::new("a", "body", "just really very good"),
            Segment::new("b", "body", words(400)).with_target(0.0),
        ];
        let report = apply_ladder(&segs, &ToneBudget::default(), "en");
        for (before, after) in segs.iter().zip(&report.segments) {
            assert_eq!(after.hints.action, Some(ToneAction::Ok));
            assert_eq!(after.text, before.text);
            assert!(!after.hints.needs_repair);
        }
        assert!(report.repair.is_empty());
    }

    #[test]
    fn small_overage_gets_rate_tweak() {
        // 10.3s of speech at 150 wpm is 25.75 words; use wpm to hit the ratio exactly.
        let text = words(25);
        let budget = ToneBudget { wpm: 25.0 * 60.0 / 10.3, ..ToneBudget::default() };
        let segs = vec![Segment::new("s1", "hook", text.clone()).with_target(10.0)];
        let report = apply_ladder(&segs, &budget, "en");
        let seg = &report.segments[0];
        assert_eq!(seg.hints.action, Some(ToneAction::RateTweak));
        assert!((seg.hints.tts_rate.unwrap() - 1.03).abs() < 1e-9);
        assert_eq!(seg.text, text);
        assert!(!seg.is_flagged());
    }

    #[test]
    fn scrub_that_empties_text_flags_repair() {
        // 4 words at 150 wpm = 1.6s; ratio 1.6 / 1.5 = 1.067 lands on the scrub rung
        let segs = vec![Segment::new("s1", "body", "just really very good").with_target(1.5)];
        let report = apply_ladder(&segs, &ToneBudget::default(), "en");
        let seg = &report.segments[0];
        assert_eq!(seg.hints.action, Some(ToneAction::FillerScrub));
        assert!(seg.hints.needs_repair);
        assert_eq!(seg.text, "just really very good");
        assert_eq!(report.repair.items.len(), 1);
        assert_eq!(report.repair.items[0].segment_id.as_str(), "s1");
    }

    #[test]
    fn scrub_shortens_text_within_budget() {
        // 20 words incl. 1 filler at 150 wpm = 8.0s against 7.5s target (1.067)
        let text = format!("{} basically", words(19));
        let segs = vec![Segment::new("s1", "body", text).with_target(7.5)];
        let report = apply_ladder(&segs, &ToneBudget::default(), "en");
        let seg = &report.segments[0];
        assert_eq!(seg.hints.action, Some(ToneAction::FillerScrub));
        assert_eq!(seg.text, words(19));
        assert!(!seg.hints.needs_repair);
        assert!((seg.hints.tts_rate.unwrap() - 1.013).abs() < 1e-9);
    }

    #[test]
    fn large_overage_escalates_without_edit() {
        let text = words(30); // 12s
        let segs = vec![
            Segment::new("ok", "intro", words(5)).with_target(10.0),
            Segment::new("long", "body", text.clone()).with_target(10.0),
        ];
        let report = apply_ladder(&segs, &ToneBudget::default(), "en");
        let seg = &report.segments[1];
        assert_eq!(seg.hints.action, Some(ToneAction::Escalate));
        assert!(seg.hints.needs_repair);
        assert_eq!(seg.text, text);
        assert_eq!(report.repair.items.len(), 1);
        let item = &report.repair.items[0];
        assert_eq!(item.segment_id.as_str(), "long");
        assert_eq!(item.kind, "body");
        assert!((item.overage_sec - 2.0).abs() < 1e-9);
    }

    #[test]
    fn empty_text_needs_human() {
        let segs = vec![Segment::new("s1", "body", "   ").with_target(5.0)];
        let report = apply_ladder(&segs, &ToneBudget::default(), "en");
        assert!(report.segments[0].hints.needs_human);
        assert_eq!(report.segments[0].text, "   ");
    }

    #[test]
    fn annotation_only_text_needs_human() {
        let segs = vec![Segment::new("s1", "body", "[pause] <break time=\"1s\"/>").with_target(2.0)];
        let report = apply_ladder(&segs, &ToneBudget::default(), "en");
        let seg = &report.segments[0];
        assert!(seg.hints.needs_human);
        assert!(seg.is_flagged());
        assert_eq!(seg.hints.estimated_sec, Some(0.0));
    }

    #[test]
    fn unmatched_brackets_are_spoken_text() {
        let lt = "Prices stay < 5 dollars for the whole season of ten long episodes";
        let bracket = "Prices stay [ 5 dollars for the whole season of ten long episodes";
        let plain = "Prices stay 5 dollars for the whole season of ten long episodes";
        assert_eq!(estimate_duration(lt, 150.0), estimate_duration(plain, 150.0));
        assert_eq!(estimate_duration(bracket, 150.0), estimate_duration(plain, 150.0));
        assert_eq!(strip_annotations("a < b [pause] c"), "a < b   c");

        // 12 words = 4.8s against a 2.0s target
        let segs = vec![Segment::new("s1", "body", lt).with_target(2.0)];
        let report = apply_ladder(&segs, &ToneBudget::default(), "en");
        assert_eq!(report.segments[0].hints.action, Some(ToneAction::Escalate));
        assert!(report.segments[0].hints.needs_repair);
    }

    #[test]
    fn escalation_waits_for_hard_ceiling() {
        let b = ToneBudget { scrub_max: 1.08, hard_ceiling: 1.2, ..ToneBudget::default() };
        assert_eq!(b.rung_for(1.15), Some(ToneAction::FillerScrub));
        assert_eq!(b.rung_for(1.2), Some(ToneAction::FillerScrub));
        assert_eq!(b.rung_for(1.21), Some(ToneAction::Escalate));
    }

    #[test]
    fn needs_human_segments_are_not_edited() {
        let mut seg = Segment::new("s1", "body", format!("{} basically", words(19))).with_target(7.5);
        seg.hints.needs_human = true;
        let report = apply_ladder(std::slice::from_ref(&seg), &ToneBudget::default(), "en");
        assert_eq!(report.segments[0], seg);
    }

    #[test]
    fn rungs_follow_ladder_order() {
        let b = ToneBudget::default();
        assert_eq!(b.rung_for(0.9), None);
        assert_eq!(b.rung_for(1.04), Some(ToneAction::RateTweak));
        assert_eq!(b.rung_for(1.08), Some(ToneAction::FillerScrub));
        assert_eq!(b.rung_for(1.5), Some(ToneAction::Escalate));
    }
}
