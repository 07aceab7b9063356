// ============================================================================
// Access Control - roles and trader allowlist
// ============================================================================
//
// Roles:
//   - owner:              administration, agent rotation, finalization
//   - creation agent:     the only caller allowed to create markets
//   - resolution agent:   the only caller allowed to resolve markets
//   - approval authority: manages the trader allowlist (defaults to owner)
//
// When `trader_approval_required` is set, only approved traders may submit
// orders, and a fill needs both the resting order's owner and the filler
// approved.
//
// Setters return `Some(event)` when the value changed and `None` when the
// call was a no-op.
//
// ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{LedgerError, LedgerResult};
use crate::events::LedgerEvent;
use crate::types::Address;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    pub owner: Address,
    pub creation_agent: Address,
    pub resolution_agent: Address,
    pub approval_authority: Address,
    pub fee_recipient: Address,
    pub trader_approval_required: bool,
    pub approved_traders: BTreeSet<Address>,
}

fn non_zero(address: &Address, field: &'static str) -> LedgerResult<()> {
    if address.is_zero() {
        return Err(LedgerError::ZeroAddress { field });
    }
    Ok(())
}

impl AccessControl {
    pub fn new(
        owner: Address,
        creation_agent: Address,
        resolution_agent: Address,
        fee_recipient: Address,
    ) -> LedgerResult<Self> {
        non_zero(&owner, "owner")?;
        non_zero(&creation_agent, "creationAgent")?;
        non_zero(&resolution_agent, "resolutionAgent")?;
        non_zero(&fee_recipient, "feeRecipient")?;

        let mut approved_traders = BTreeSet::new();
        approved_traders.insert(owner.clone());

        Ok(Self {
            approval_authority: owner.clone(),
            owner,
            creation_agent,
            resolution_agent,
            fee_recipient,
            trader_approval_required: false,
            approved_traders,
        })
    }

    // ===== GATES =====

    pub fn require_owner(&self, caller: &Address) -> LedgerResult<()> {
        if *caller != self.owner {
            return Err(LedgerError::NotOwner { caller: caller.clone() });
        }
        Ok(())
    }

    pub fn require_creation_agent(&self, caller: &Address) -> LedgerResult<()> {
        if *caller != self.creation_agent {
            return Err(LedgerError::NotCreationAgent { caller: caller.clone() });
        }
        Ok(())
    }

    pub fn require_resolution_agent(&self, caller: &Address) -> LedgerResult<()> {
        if *caller != self.resolution_agent {
            return Err(LedgerError::NotResolutionAgent { caller: caller.clone() });
        }
        Ok(())
    }

    /// Owner or approval authority
    pub fn require_allowlist_manager(&self, caller: &Address) -> LedgerResult<()> {
        if *caller != self.owner && *caller != self.approval_authority {
            return Err(LedgerError::NotApprovalAuthority { caller: caller.clone() });
        }
        Ok(())
    }

    pub fn is_trader_approved(&self, trader: &Address) -> bool {
        self.approved_traders.contains(trader)
    }

    /// Passes when approval is not required or `trader` is approved
    pub fn require_trader(&self, trader: &Address) -> LedgerResult<()> {
        if self.trader_approval_required && !self.is_trader_approved(trader) {
            return Err(LedgerError::TraderNotApproved { trader: trader.clone() });
        }
        Ok(())
    }

    // ===== OWNER SETTERS =====

    pub fn set_creation_agent(&mut self, caller: &Address, agent: Address) -> LedgerResult<Option<LedgerEvent>> {
        self.require_owner(caller)?;
        non_zero(&agent, "creationAgent")?;
        if agent == self.creation_agent {
            return Ok(None);
        }
        self.creation_agent = agent.clone();
        Ok(Some(LedgerEvent::CreationAgentUpdated { agent }))
    }

    pub fn set_resolution_agent(&mut self, caller: &Address, agent: Address) -> LedgerResult<Option<LedgerEvent>> {
        self.require_owner(caller)?;
        non_zero(&agent, "resolutionAgent")?;
        if agent == self.resolution_agent {
            return Ok(None);
        }
        self.resolution_agent = agent.clone();
        Ok(Some(LedgerEvent::ResolutionAgentUpdated { agent }))
    }

    pub fn set_fee_recipient(&mut self, caller: &Address, recipient: Address) -> LedgerResult<Option<LedgerEvent>> {
        self.require_owner(caller)?;
        non_zero(&recipient, "feeRecipient")?;
        if recipient == self.fee_recipient {
            return Ok(None);
        }
        self.fee_recipient = recipient.clone();
        Ok(Some(LedgerEvent::FeeRecipientUpdated { recipient }))
    }

    /// Rotating the authority also approves it as a trader
    pub fn set_approval_authority(
        &mut self,
        caller: &Address,
        authority: Address,
    ) -> LedgerResult<Vec<LedgerEvent>> {
        self.require_owner(caller)?;
        non_zero(&authority, "approvalAuthority")?;
        let mut events = Vec::new();
        if authority != self.approval_authority {
            self.approval_authority = authority.clone();
            events.push(LedgerEvent::ApprovalAuthorityUpdated { authority: authority.clone() });
        }
        if self.approved_traders.insert(authority.clone()) {
            events.push(LedgerEvent::TraderApprovalUpdated { trader: authority, approved: true });
        }
        Ok(events)
    }

    pub fn transfer_ownership(&mut self, caller: &Address, new_owner: Address) -> LedgerResult<Option<LedgerEvent>> {
        self.require_owner(caller)?;
        non_zero(&new_owner, "owner")?;
        if new_owner == self.owner {
            return Ok(None);
        }
        let previous_owner = std::mem::replace(&mut self.owner, new_owner.clone());
        Ok(Some(LedgerEvent::OwnershipTransferred { previous_owner, new_owner }))
    }

    // ===== ALLOWLIST =====

    pub fn set_trader_approval_required(&mut self, caller: &Address, required: bool) -> LedgerResult<Option<LedgerEvent>> {
        self.require_allowlist_manager(caller)?;
        if required == self.trader_approval_required {
            return Ok(None);
        }
        self.trader_approval_required = required;
        Ok(Some(LedgerEvent::TraderApprovalRequirementUpdated { required }))
    }

    pub fn set_trader_approval(
        &mut self,
        caller: &Address,
        trader: Address,
        approved: bool,
    ) -> LedgerResult<Option<LedgerEvent>> {
        self.require_allowlist_manager(caller)?;
        non_zero(&trader, "trader")?;
        let changed = if approved {
            self.approved_traders.insert(trader.clone())
        } else {
            self.approved_traders.remove(&trader)
        };
        if !changed {
            return Ok(None);
        }
        Ok(Some(LedgerEvent::TraderApprovalUpdated { trader, approved }))
    }
}

// ============================================================================
// TESTS
// ============================================================================
