use std::collections::VecDeque;
use std::fmt::Debug;

use tracing::debug;

use crate::config::StabilizerConfig;

/// 安定化の対象になるラベル
pub trait StabilizerLabel: Copy + Eq + Debug {
    /// false のラベルは投票に入れない
    fn is_known(&self) -> bool;
    /// 見分けにくいラベル同士か（対称）
    fn is_similar(&self, other: &Self) -> bool;
}

/// 直近の判定を新しいほど重く投票し、ヒステリシス付きでラベルを確定する
pub struct LabelStabilizer<L> {
    window_size: usize,
    similar_discount: f32,
    min_margin: f32,
    similar_margin: f32,
    window: VecDeque<(L, f32)>,
    stable: Option<L>,
}

impl<L: StabilizerLabel> LabelStabilizer<L> {
    pub fn new(window_size: usize, similar_discount: f32, min_margin: f32, similar_margin: f32) -> Self {
        Self {
            window_size,
            similar_discount,
            min_margin,
            similar_margin,
            window: VecDeque::with_capacity(window_size + 1),
            stable: None,
        }
    }

    pub fn from_config(config: &StabilizerConfig) -> Self {
        Self::new(
            config.window_size,
            config.similar_discount,
            config.min_margin,
            config.similar_margin,
        )
    }

    pub fn current(&self) -> Option<L> {
        self.stable
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// 観測を1件追加し、確定ラベルを返す
    pub fn update(&mut self, label: L, confidence: f32) -> Option<L> {
        if !label.is_known() {
            return self.stable;
        }

        let mut weight = confidence.max(0.0);
        if let Some(stable) = self.stable {
            if label != stable && label.is_similar(&stable) {
                weight *= self.similar_discount;
            }
        }
        self.window.push_back((label, weight));
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }

        self.decide();
        self.stable
    }

    fn decide(&mut self) {
        // 出現順を保った集計
        let mut totals: Vec<(L, f32)> = Vec::new();
        for (i, &(label, weight)) in self.window.iter().enumerate() {
            let w = weight * (i + 1) as f32;
            match totals.iter_mut().find(|(l, _)| *l == label) {
                Some(entry) => entry.1 += w,
                None => totals.push((label, w)),
            }
        }

        let stable = self.stable;
        // 同点なら現在のラベルを優先
        let rank = |(l, w): &(L, f32)| (*w, Some(*l) == stable);
        let Some(top_index) = (0..totals.len()).max_by(|&a, &b| {
            rank(&totals[a])
                .partial_cmp(&rank(&totals[b]))
                .unwrap_or(std::cmp::Ordering::Equal)
        }) else {
            return;
        };
        let (top, top_weight) = totals[top_index];
        let second_weight = totals
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != top_index)
            .map(|(_, &(_, w))| w)
            .fold(0.0f32, f32::max);
        let total: f32 = totals.iter().map(|&(_, w)| w).sum();

        let Some(current) = stable else {
            self.stable = Some(top);
            return;
        };
        if top == current {
            return;
        }

        let margin = if total > 0.0 {
            (top_weight - second_weight) / total
        } else {
            0.0
        };
        let required = if top.is_similar(&current) {
            self.similar_margin
        } else {
            self.min_margin
        };
        if margin > required {
            debug!(from = ?current, to = ?top, margin, "stable label switched");
            self.stable = Some(top);
        }
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.stable = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A〜E のテスト用ラベル。A-B, B-C が類似。X は未知
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum L {
        A,
        B,
        C,
        D,
        E,
        X,
    }

    impl StabilizerLabel for L {
        fn is_known(&self) -> bool {
            *self != L::X
        }

        fn is_similar(&self, other: &Self) -> bool {
            matches!((self, other), (L::A, L::B) | (L::B, L::A) | (L::B, L::C) | (L::C, L::B))
        }
    }

    fn stabilizer() -> LabelStabilizer<L> {
        LabelStabilizer::from_config(&StabilizerConfig::default())
    }

    fn fill(s: &mut LabelStabilizer<L>, label: L, n: usize) {
        for _ in 0..n {
            s.update(label, 0.9);
        }
    }

    #[test]
    fn test_first_label_is_stable_immediately() {
        let mut s = stabilizer();
        assert_eq!(s.current(), None);
        assert_eq!(s.update(L::D, 0.9), Some(L::D));
        assert_eq!(s.update(L::D, 0.9), Some(L::D));
    }

    #[test]
    fn test_unknown_labels_are_dropped() {
        let mut s = stabilizer();
        assert_eq!(s.update(L::X, 0.9), None);
        assert!(s.is_empty());
        s.update(L::A, 0.9);
        assert_eq!(s.update(L::X, 0.9), Some(L::A));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut s = stabilizer();
        fill(&mut s, L::A, 20);
        assert_eq!(s.len(), 7);
    }

    #[test]
    fn test_alternating_unrelated_labels_do_not_switch() {
        let mut s = stabilizer();
        fill(&mut s, L::A, 7);
        for i in 0..30 {
            let label = if i % 2 == 0 { L::D } else { L::E };
            assert_eq!(s.update(label, 0.9), Some(L::A), "frame {i}");
        }
    }

    #[test]
    fn test_unrelated_label_switches_after_margin() {
        let mut s = stabilizer();
        fill(&mut s, L::A, 7);
        assert_eq!(s.update(L::D, 0.9), Some(L::A));
        assert_eq!(s.update(L::D, 0.9), Some(L::A));
        assert_eq!(s.update(L::D, 0.9), Some(L::D));
    }

    #[test]
    fn test_similar_label_needs_more_evidence() {
        let mut s = stabilizer();
        fill(&mut s, L::A, 7);
        for _ in 0..3 {
            assert_eq!(s.update(L::B, 0.9), Some(L::A));
        }
        assert_eq!(s.update(L::B, 0.9), Some(L::B));
    }

    #[test]
    fn test_reset_clears_state() {
        let mut s = stabilizer();
        fill(&mut s, L::A, 7);
        s.reset();
        assert_eq!(s.current(), None);
        assert!(s.is_empty());
        assert_eq!(s.update(L::C, 0.5), Some(L::C));
    }
}
