//! Superposition, collapse, and entropy over a token's quantum fields.
//!
//! These are deterministic data-structure operations. A superposition is an
//! owned list of alternative `(type, value)` states with parallel amplitude
//! weights; collapse copies one state into the token and discards the rest.
//! Entanglement is a symmetric adjacency relation between tokens in a
//! [`TokenTable`](crate::token::TokenTable) and lives in [`entangle`].
//!
//! ```text
//! Unresolved ──superpose──► Superposed ──collapse(i)──► Unresolved (state i)
//! ```

pub mod entangle;

use crate::error::{Error, ErrorKind, Result};
use crate::token::{Token, TokenType, TokenValue, ValidationBits};
use crate::tracing_compat::debug;
use crate::types::{EntanglementId, TokenId};
use smallvec::SmallVec;

/// One alternative state of a superposed token.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantumState {
    /// Type tag the token takes if this state is selected.
    pub ty: TokenType,
    /// Value the token takes if this state is selected.
    pub value: TokenValue,
}

impl QuantumState {
    /// Creates a state.
    #[must_use]
    pub fn new(ty: TokenType, value: impl Into<TokenValue>) -> Self {
        Self {
            ty,
            value: value.into(),
        }
    }
}

/// Alternative states with parallel amplitude weights.
#[derive(Debug, Clone, PartialEq)]
pub struct Superposition {
    states: SmallVec<[QuantumState; 4]>,
    amplitudes: SmallVec<[f64; 4]>,
}

impl Superposition {
    /// Builds a superposition.
    ///
    /// Without amplitudes every state gets `sqrt(1/n)`, so squared amplitudes
    /// sum to one. Supplied amplitudes are stored as given.
    pub fn new(states: Vec<QuantumState>, amplitudes: Option<Vec<f64>>) -> Result<Self> {
        if states.is_empty() {
            return Err(Error::new(ErrorKind::EmptySuperposition));
        }
        let amplitudes: SmallVec<[f64; 4]> = match amplitudes {
            Some(amps) if amps.len() != states.len() => {
                return Err(Error::new(ErrorKind::AmplitudeMismatch).with_message(format!(
                    "{} amplitudes for {} states",
                    amps.len(),
                    states.len()
                )));
            }
            Some(amps) => amps.into_iter().collect(),
            None => {
                #[allow(clippy::cast_precision_loss)]
                let uniform = (1.0 / states.len() as f64).sqrt();
                std::iter::repeat_n(uniform, states.len()).collect()
            }
        };
        Ok(Self {
            states: states.into_iter().collect(),
            amplitudes,
        })
    }

    /// Number of alternative states.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Always false; a superposition holds at least one state.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// The alternative states.
    #[must_use]
    pub fn states(&self) -> &[QuantumState] {
        &self.states
    }

    /// The amplitude weights, parallel to [`states`](Self::states).
    #[must_use]
    pub fn amplitudes(&self) -> &[f64] {
        &self.amplitudes
    }

    /// Squared amplitude of state `index`.
    #[must_use]
    pub fn probability(&self, index: usize) -> Option<f64> {
        self.amplitudes.get(index).map(|a| a * a)
    }

    /// Shannon entropy in bits over squared amplitudes, skipping zero terms.
    #[must_use]
    pub fn entropy(&self) -> f64 {
        self.amplitudes
            .iter()
            .map(|a| a * a)
            .filter(|p| *p > 0.0)
            .map(|p| -p * p.log2())
            .sum()
    }

    /// Index and probability of the most probable state; ties go to the
    /// lowest index.
    #[must_use]
    pub fn most_probable(&self) -> (usize, f64) {
        let mut best = (0, self.probability(0).unwrap_or(0.0));
        for index in 1..self.len() {
            let p = self.probability(index).unwrap_or(0.0);
            if p > best.1 {
                best = (index, p);
            }
        }
        best
    }

    fn take(mut self, index: usize) -> QuantumState {
        self.states.swap_remove(index)
    }
}

/// A link from one token to an entangled partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntanglementLink {
    /// The partner token.
    pub partner: TokenId,
    /// Group the link was made under.
    pub id: EntanglementId,
}

impl Token {
    /// Returns true while the token holds a superposition.
    #[must_use]
    pub fn is_superposed(&self) -> bool {
        self.bits.contains(ValidationBits::SUPERPOSED)
    }

    /// Returns the superposition, if any.
    #[must_use]
    pub const fn superposition(&self) -> Option<&Superposition> {
        self.superposition.as_ref()
    }

    /// Places the token in superposition over `states`.
    ///
    /// Fails if `states` is empty or amplitudes do not match the state count.
    /// A token already superposed has its superposition replaced.
    pub fn superpose(
        &mut self,
        states: Vec<QuantumState>,
        amplitudes: Option<Vec<f64>>,
    ) -> Result<()> {
        let superposition = Superposition::new(states, amplitudes)
            .map_err(|e| e.with_location(self.location.clone()))?;
        debug!(
            ty = %self.ty,
            states = superposition.len(),
            entropy = superposition.entropy(),
            "token superposed"
        );
        self.superposition = Some(superposition);
        self.bits.insert(ValidationBits::SUPERPOSED);
        Ok(())
    }

    /// Resolves the superposition to state `index`.
    ///
    /// Copies the selected type and value into the token, discards the
    /// superposition, and clears `SUPERPOSED`. Irreversible.
    pub fn collapse(&mut self, index: usize) -> Result<()> {
        let len = self.require_superposition()?.len();
        if index >= len {
            return Err(Error::new(ErrorKind::IndexOutOfRange)
                .with_message(format!("index {index} of {len} states"))
                .with_location(self.location.clone()));
        }
        let Some(superposition) = self.superposition.take() else {
            return Err(self.not_superposed());
        };
        let selected = superposition.take(index);
        debug!(from = %self.ty, to = %selected.ty, index, "token collapsed");
        self.ty = selected.ty;
        self.value = selected.value;
        self.bits.remove(ValidationBits::SUPERPOSED);
        Ok(())
    }

    /// Shannon entropy of the superposition; zero when not superposed.
    #[must_use]
    pub fn entropy(&self) -> f64 {
        self.superposition
            .as_ref()
            .filter(|_| self.is_superposed())
            .map_or(0.0, Superposition::entropy)
    }

    /// Squared amplitude of state `index`, if superposed and in range.
    #[must_use]
    pub fn probability(&self, index: usize) -> Option<f64> {
        self.superposition.as_ref()?.probability(index)
    }

    /// Collapses to the most probable state (ties to the lowest index).
    ///
    /// Returns the selected index and its probability.
    pub fn measure(&mut self) -> Result<(usize, f64)> {
        let (index, p) = self.require_superposition()?.most_probable();
        self.collapse(index)?;
        Ok((index, p))
    }

    /// Collapses to the first state whose probability is at least `threshold`.
    ///
    /// Leaves the token superposed when none qualifies.
    pub fn collapse_by_probability(&mut self, threshold: f64) -> Result<usize> {
        let superposition = self.require_superposition()?;
        let index = (0..superposition.len())
            .find(|&i| superposition.probability(i).is_some_and(|p| p >= threshold))
            .ok_or_else(|| {
                Error::new(ErrorKind::ThresholdNotMet)
                    .with_message(format!("threshold {threshold}"))
                    .with_location(self.location.clone())
            })?;
        self.collapse(index)?;
        Ok(index)
    }

    /// Returns the phase scalar.
    #[must_use]
    pub const fn phase(&self) -> f64 {
        self.phase
    }

    /// Sets the phase scalar.
    pub fn set_phase(&mut self, phase: f64) {
        self.phase = phase;
    }

    /// Returns the entanglement links.
    #[must_use]
    pub fn links(&self) -> &[EntanglementLink] {
        &self.links
    }

    fn require_superposition(&self) -> Result<&Superposition> {
        match &self.superposition {
            Some(s) if self.is_superposed() => Ok(s),
            _ => Err(self.not_superposed()),
        }
    }

    fn not_superposed(&self) -> Error {
        Error::new(ErrorKind::NotSuperposed).with_location(self.location.clone())
    }

    pub(crate) fn add_link(&mut self, link: EntanglementLink) {
        if !self.links.contains(&link) {
            self.links.push(link);
        }
        self.bits.insert(ValidationBits::ENTANGLED);
    }

    /// Removes links matching `pred`; returns them and clears `ENTANGLED`
    /// when none remain.
    pub(crate) fn drop_links_where(
        &mut self,
        pred: impl Fn(&EntanglementLink) -> bool,
    ) -> SmallVec<[EntanglementLink; 2]> {
        let mut removed = SmallVec::new();
        self.links.retain(|link| {
            if pred(link) {
                removed.push(*link);
                false
            } else {
                true
            }
        });
        if self.links.is_empty() {
            self.bits.remove(ValidationBits::ENTANGLED);
        }
        removed
    }

    pub(crate) fn drop_links_to(&mut self, partner: TokenId) {
        let _ = self.drop_links_where(|link| link.partner == partner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemorySpan, SpanKind};

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    fn token() -> Token {
        Token::construct(
            TokenType::QInt,
            MemorySpan::unaccounted(SpanKind::Superposed, 64),
        )
    }

    fn abc() -> Vec<QuantumState> {
        vec![
            QuantumState::new(TokenType::Int, 1_i64),
            QuantumState::new(TokenType::Float, 2.5),
            QuantumState::new(TokenType::String, "c"),
        ]
    }

    #[test]
    fn collapse_selects_state() {
        init_test("collapse_selects_state");
        let mut t = token();
        t.superpose(abc(), None).unwrap();
        assert!(t.has(ValidationBits::SUPERPOSED));
        t.collapse(1).unwrap();
        assert_eq!(t.token_type(), TokenType::Float);
        assert_eq!(t.value(), &TokenValue::Float(2.5));
        assert!(!t.has(ValidationBits::SUPERPOSED));
        assert!(t.superposition().is_none());
        assert_eq!(t.collapse(0).unwrap_err().kind(), ErrorKind::NotSuperposed);
        crate::test_complete!("collapse_selects_state");
    }

    #[test]
    fn collapse_out_of_range_keeps_superposition() {
        init_test("collapse_out_of_range_keeps_superposition");
        let mut t = token();
        t.superpose(abc(), None).unwrap();
        assert_eq!(t.collapse(3).unwrap_err().kind(), ErrorKind::IndexOutOfRange);
        assert!(t.is_superposed());
        assert_eq!(t.superposition().unwrap().len(), 3);
        crate::test_complete!("collapse_out_of_range_keeps_superposition");
    }

    #[test]
    fn superpose_rejects_bad_input() {
        init_test("superpose_rejects_bad_input");
        let mut t = token();
        assert_eq!(
            t.superpose(Vec::new(), None).unwrap_err().kind(),
            ErrorKind::EmptySuperposition
        );
        assert_eq!(
            t.superpose(abc(), Some(vec![1.0])).unwrap_err().kind(),
            ErrorKind::AmplitudeMismatch
        );
        assert!(!t.is_superposed());
        crate::test_complete!("superpose_rejects_bad_input");
    }

    #[test]
    fn uniform_entropy_is_log2_n() {
        init_test("uniform_entropy_is_log2_n");
        let mut t = token();
        assert!(t.entropy().abs() < f64::EPSILON);
        let states: Vec<_> = (0..4_i64)
            .map(|i| QuantumState::new(TokenType::Int, i))
            .collect();
        t.superpose(states, None).unwrap();
        assert!((t.entropy() - 2.0).abs() < 1e-9);
        assert!((t.probability(2).unwrap() - 0.25).abs() < 1e-12);
        crate::test_complete!("uniform_entropy_is_log2_n");
    }

    #[test]
    fn zero_amplitudes_are_skipped() {
        init_test("zero_amplitudes_are_skipped");
        let mut t = token();
        t.superpose(abc(), Some(vec![1.0, 0.0, 0.0])).unwrap();
        assert!(t.entropy().abs() < 1e-12);
        crate::test_complete!("zero_amplitudes_are_skipped");
    }

    #[test]
    fn measure_picks_highest_then_lowest_index() {
        init_test("measure_picks_highest_then_lowest_index");
        let mut t = token();
        t.superpose(abc(), Some(vec![0.5, 0.8, 0.8])).unwrap();
        let (index, p) = t.measure().unwrap();
        assert_eq!(index, 1);
        assert!((p - 0.64).abs() < 1e-12);
        assert_eq!(t.token_type(), TokenType::Float);
        crate::test_complete!("measure_picks_highest_then_lowest_index");
    }

    #[test]
    fn collapse_by_probability_threshold() {
        init_test("collapse_by_probability_threshold");
        let mut t = token();
        t.superpose(abc(), Some(vec![0.3, 0.6, 0.742])).unwrap();
        assert_eq!(
            t.collapse_by_probability(0.9).unwrap_err().kind(),
            ErrorKind::ThresholdNotMet
        );
        assert!(t.is_superposed());
        assert_eq!(t.collapse_by_probability(0.3).unwrap(), 1);
        assert_eq!(t.value(), &TokenValue::Float(2.5));
        crate::test_complete!("collapse_by_probability_threshold");
    }

    #[test]
    fn phase_is_stored() {
        init_test("phase_is_stored");
        let mut t = token();
        assert!(t.phase().abs() < f64::EPSILON);
        t.set_phase(std::f64::consts::FRAC_PI_2);
        assert!((t.phase() - std::f64::consts::FRAC_PI_2).abs() < f64::EPSILON);
        crate::test_complete!("phase_is_stored");
    }
}
