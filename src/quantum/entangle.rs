//! Symmetric entanglement links between tokens in one table.

use crate::error::{Error, ErrorKind, Result};
use crate::token::TokenTable;
use crate::tracing_compat::debug;
use crate::types::{EntanglementId, TokenId};

use super::{EntanglementLink, QuantumState};

impl TokenTable {
    /// Links `a` and `b` under `id`, in both directions.
    ///
    /// Both tokens get `ENTANGLED`. Links under other ids are kept; linking
    /// the same pair under the same id twice is a no-op.
    pub fn entangle(&mut self, a: TokenId, b: TokenId, id: EntanglementId) -> Result<()> {
        if a == b {
            return Err(Error::new(ErrorKind::SelfEntanglement).with_token(a));
        }
        // Check both before mutating either so a stale partner leaves no
        // half-link behind.
        self.get(a)?;
        self.get(b)?;
        self.get_mut(a)?.add_link(EntanglementLink { partner: b, id });
        self.get_mut(b)?.add_link(EntanglementLink { partner: a, id });
        debug!(%a, %b, %id, "tokens entangled");
        Ok(())
    }

    /// Removes every link on `handle` made under `id`, from both sides.
    ///
    /// `ENTANGLED` is cleared on any token left with no links. Returns the
    /// number of partners unlinked.
    pub fn disentangle(&mut self, handle: TokenId, id: EntanglementId) -> Result<usize> {
        let removed = self.get_mut(handle)?.drop_links_where(|link| link.id == id);
        for link in &removed {
            if let Ok(partner) = self.get_mut(link.partner) {
                let _ = partner.drop_links_where(|l| l.partner == handle && l.id == id);
            }
        }
        debug!(token = %handle, %id, unlinked = removed.len(), "token disentangled");
        Ok(removed.len())
    }

    /// Partners of `handle` across all entanglement ids, deduplicated.
    pub fn entangled_with(&self, handle: TokenId) -> Result<Vec<TokenId>> {
        let mut partners: Vec<TokenId> = self
            .get(handle)?
            .links()
            .iter()
            .map(|link| link.partner)
            .collect();
        partners.sort_unstable();
        partners.dedup();
        Ok(partners)
    }

    /// Partners of `handle` linked under `id`.
    pub fn partners(&self, handle: TokenId, id: EntanglementId) -> Result<Vec<TokenId>> {
        Ok(self
            .get(handle)?
            .links()
            .iter()
            .filter(|link| link.id == id)
            .map(|link| link.partner)
            .collect())
    }

    /// Places `handle` in superposition over `states`.
    pub fn superpose(
        &mut self,
        handle: TokenId,
        states: Vec<QuantumState>,
        amplitudes: Option<Vec<f64>>,
    ) -> Result<()> {
        self.get_mut(handle)?
            .superpose(states, amplitudes)
            .map_err(|e| e.with_token(handle))
    }

    /// Superposes `target` over the current `(type, value)` of `sources`.
    pub fn superpose_from(
        &mut self,
        target: TokenId,
        sources: &[TokenId],
        amplitudes: Option<Vec<f64>>,
    ) -> Result<()> {
        let states = sources
            .iter()
            .map(|&source| {
                let token = self.get(source)?;
                Ok(QuantumState {
                    ty: token.token_type(),
                    value: token.value().clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.get_mut(target)?
            .superpose(states, amplitudes)
            .map_err(|e| e.with_token(target))
    }

    /// Collapses `handle` to state `index`; see [`Token::collapse`](crate::token::Token::collapse).
    ///
    /// Entangled partners are not collapsed.
    pub fn collapse(&mut self, handle: TokenId, index: usize) -> Result<()> {
        self.get_mut(handle)?
            .collapse(index)
            .map_err(|e| e.with_token(handle))
    }

    /// Entropy of `handle`'s superposition.
    pub fn entropy(&self, handle: TokenId) -> Result<f64> {
        Ok(self.get(handle)?.entropy())
    }
}
