//! EraValue ledger: a versioned accumulator keyed to the era clock.
//!
//! An [`EraValue`] pairs the balance finalized at the start of its `era`
//! (`value`) with the running total accumulated during that era
//! (`value_after`). Entries are only rewritten when touched: when an entry
//! last written in an earlier era is updated, its pending `value_after`
//! becomes the new finalized `value`. A single `value_after` therefore stands
//! in for every untouched era in between.

use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::amount::{self, Amount};
use crate::error::ProcessingError;

/// A finalized prior-window value plus the pending current-window value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EraValue {
    /// Era in which this entry was last written.
    pub era: u64,
    /// Balance as of the start of `era`.
    #[serde(with = "amount::hex")]
    pub value: Amount,
    /// Running total during `era`.
    #[serde(with = "amount::hex")]
    pub value_after: Amount,
}

/// How a delta is folded into the pending value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EraOp {
    Add,
    Sub,
    Replace,
}

impl EraOp {
    pub fn apply(self, current: &Amount, delta: &Amount) -> Amount {
        match self {
            Self::Add => current + delta,
            Self::Sub => current - delta,
            Self::Replace => delta.clone(),
        }
    }
}

impl EraValue {
    /// An entry whose finalized and pending values are both `amount`.
    ///
    /// Used where a value must take effect immediately instead of at the next
    /// era boundary.
    pub fn settled(era: u64, amount: Amount) -> Self {
        Self {
            era,
            value: amount.clone(),
            value_after: amount,
        }
    }

    /// Returns `true` if nothing is pending for the next era.
    pub fn is_settled(&self) -> bool {
        self.value == self.value_after
    }

    /// The value in effect during `era`, as far as this entry can tell.
    ///
    /// For eras after the one the entry was last written in, the pending
    /// total has been finalized.
    pub fn value_at(&self, era: u64) -> &Amount {
        if era > self.era {
            &self.value_after
        } else {
            &self.value
        }
    }
}

/// Apply `delta` with `op` to `existing`, rolling the window over to
/// `current_era` if the entry was last written in an earlier era.
///
/// Fails if `existing` was written in an era later than `current_era`: the
/// era of a ledger entry never moves backwards.
pub fn upsert(
    existing: Option<&EraValue>,
    delta: &Amount,
    op: EraOp,
    current_era: u64,
) -> Result<EraValue, ProcessingError> {
    let Some(existing) = existing else {
        return Ok(EraValue {
            era: current_era,
            value: Amount::zero(),
            value_after: op.apply(&Amount::zero(), delta),
        });
    };

    if existing.era > current_era {
        return Err(ProcessingError::MissingPrecondition(format!(
            "era value last written in era {} but current era is {current_era}",
            existing.era
        )));
    }

    let value = if existing.era == current_era {
        existing.value.clone()
    } else {
        // Window rolled over since the last write.
        existing.value_after.clone()
    };

    Ok(EraValue {
        era: current_era,
        value,
        value_after: op.apply(&existing.value_after, delta),
    })
}
