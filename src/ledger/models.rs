use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AppError, AppResult, LedgerError};

/// Persisted id of the bank side of a transfer.
pub const BANK_PARTY_ID: &str = "none";

/// One side of a transfer: a group member or the bank.
///
/// The bank is not owned by anyone and has an unlimited balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Party {
    Bank,
    User(Uuid),
}

impl Party {
    pub fn is_bank(&self) -> bool {
        matches!(self, Party::Bank)
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Party::Bank => None,
            Party::User(id) => Some(*id),
        }
    }

    /// Rebuild a party from its `(is_bank, id)` column pair.
    pub fn from_columns(is_bank: bool, id: Option<Uuid>) -> AppResult<Self> {
        match (is_bank, id) {
            (true, _) => Ok(Party::Bank),
            (false, Some(id)) => Ok(Party::User(id)),
            (false, None) => Err(AppError::Internal(
                "non-bank party stored without a user id".to_string(),
            )),
        }
    }

    pub fn to_columns(&self) -> (bool, Option<Uuid>) {
        (self.is_bank(), self.user_id())
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Party::Bank => f.write_str(BANK_PARTY_ID),
            Party::User(id) => write!(f, "{}", id),
        }
    }
}

impl FromStr for Party {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == BANK_PARTY_ID {
            return Ok(Party::Bank);
        }
        Uuid::parse_str(s)
            .map(Party::User)
            .map_err(|_| AppError::InvalidInput(format!("Invalid party id: {}", s)))
    }
}

impl TryFrom<String> for Party {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Party> for String {
    fn from(party: Party) -> Self {
        party.to_string()
    }
}

/// Group entity. Membership lives outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// User entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Immutable transaction log entry.
///
/// INVARIANT: `amount > 0`, and for every user side the recorded new balance
/// equals the previous balance plus the recorded difference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    /// Store-assigned append order. Later entries always carry a larger seq.
    pub seq: i64,
    pub group_id: Uuid,
    pub title: String,
    pub description: String,
    pub amount: i64,

    pub sender: Party,
    pub new_balance_sender: i64,
    pub balance_difference_sender: i64,

    pub receiver: Party,
    pub new_balance_receiver: i64,
    pub balance_difference_receiver: i64,

    pub payment_plan_id: Option<Uuid>,
    /// The plan occurrence this entry materialised.
    pub plan_occurrence: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Balance recorded for `party` on this entry, if the party is a user
    /// taking part in it.
    pub fn balance_of(&self, party: Party) -> Option<i64> {
        if party.is_bank() {
            return None;
        }
        if self.sender == party {
            Some(self.new_balance_sender)
        } else if self.receiver == party {
            Some(self.new_balance_receiver)
        } else {
            None
        }
    }

    pub fn involves(&self, party: Party) -> bool {
        self.sender == party || self.receiver == party
    }

    /// Create from database row
    pub fn from_row(row: &sqlx::postgres::PgRow) -> AppResult<Self> {
        use sqlx::Row;

        let sender = Party::from_columns(row.try_get("sender_is_bank")?, row.try_get("sender_id")?)?;
        let receiver = Party::from_columns(
            row.try_get("receiver_is_bank")?,
            row.try_get("receiver_id")?,
        )?;

        Ok(LedgerEntry {
            id: row.try_get("id")?,
            seq: row.try_get("seq")?,
            group_id: row.try_get("group_id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            amount: row.try_get("amount")?,
            sender,
            new_balance_sender: row.try_get("new_balance_sender")?,
            balance_difference_sender: row.try_get("balance_difference_sender")?,
            receiver,
            new_balance_receiver: row.try_get("new_balance_receiver")?,
            balance_difference_receiver: row.try_get("balance_difference_receiver")?,
            payment_plan_id: row.try_get("payment_plan_id")?,
            plan_occurrence: row.try_get("plan_occurrence")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Reference from an entry back to the plan occurrence that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanOccurrence {
    pub plan_id: Uuid,
    pub due_at: DateTime<Utc>,
}

/// Input for `LedgerStore::create_entry`.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub group_id: Uuid,
    pub sender: Party,
    pub receiver: Party,
    pub title: String,
    pub description: String,
    pub amount: i64,
    pub occurrence: Option<PlanOccurrence>,
    /// Re-check the sender's balance inside the append critical section.
    pub require_cover: bool,
}

/// Resulting balances of a transfer, derived from the prior balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub new_balance_sender: i64,
    pub balance_difference_sender: i64,
    pub new_balance_receiver: i64,
    pub balance_difference_receiver: i64,
}

impl NewEntry {
    pub fn transfer(
        group_id: Uuid,
        sender: Party,
        receiver: Party,
        title: impl Into<String>,
        amount: i64,
    ) -> Self {
        Self {
            group_id,
            sender,
            receiver,
            title: title.into(),
            description: String::new(),
            amount,
            occurrence: None,
            require_cover: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn from_plan(mut self, plan_id: Uuid, due_at: DateTime<Utc>) -> Self {
        self.occurrence = Some(PlanOccurrence { plan_id, due_at });
        self
    }

    pub fn require_cover(mut self, require: bool) -> Self {
        self.require_cover = require;
        self
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.amount <= 0 {
            return Err(LedgerError::InvalidAmount(self.amount).into());
        }
        if self.sender == self.receiver {
            return Err(LedgerError::SelfTransfer.into());
        }
        Ok(())
    }

    /// Enforce cover for the sender when requested. The bank always covers.
    pub fn check_cover(&self, sender_prior: i64) -> AppResult<()> {
        if self.require_cover && !self.sender.is_bank() && sender_prior < self.amount {
            return Err(LedgerError::InsufficientBalance {
                party: self.sender,
                required: self.amount,
                available: sender_prior,
            }
            .into());
        }
        Ok(())
    }

    /// Derive new balances. Bank sides record zero.
    pub fn settle(&self, sender_prior: i64, receiver_prior: i64) -> AppResult<Settlement> {
        let (new_balance_sender, balance_difference_sender) = if self.sender.is_bank() {
            (0, 0)
        } else {
            let balance = sender_prior
                .checked_sub(self.amount)
                .ok_or(LedgerError::BalanceOverflow { party: self.sender })?;
            (balance, -self.amount)
        };
        let (new_balance_receiver, balance_difference_receiver) = if self.receiver.is_bank() {
            (0, 0)
        } else {
            let balance = receiver_prior
                .checked_add(self.amount)
                .ok_or(LedgerError::BalanceOverflow {
                    party: self.receiver,
                })?;
            (balance, self.amount)
        };

        Ok(Settlement {
            new_balance_sender,
            balance_difference_sender,
            new_balance_receiver,
            balance_difference_receiver,
        })
    }
}
