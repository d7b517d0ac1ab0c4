//! Resource quantity bookkeeping.
//!
//! Every operation keeps `available + allocated == quantity` with both sides
//! non-negative; a failed check leaves the stock untouched.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stock {
    pub quantity: i64,
    pub available: i64,
    pub allocated: i64,
}

impl Stock {
    pub fn new(quantity: i64) -> Result<Self, LedgerError> {
        if quantity < 0 {
            return Err(LedgerError::InvalidQuantity);
        }
        Ok(Self {
            quantity,
            available: quantity,
            allocated: 0,
        })
    }

    pub fn is_balanced(&self) -> bool {
        self.available >= 0 && self.allocated >= 0 && self.available + self.allocated == self.quantity
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Quantity must be a positive number")]
    InvalidQuantity,

    #[error("Requested {requested} but only {available} available")]
    InsufficientAvailableQuantity { requested: i64, available: i64 },

    #[error("No allocation found for project {project_id}")]
    AllocationNotFound { project_id: i64 },

    #[error("Cannot release {requested}; only {allocated} allocated to this project")]
    OverDeallocation { requested: i64, allocated: i64 },

    #[error("Total quantity {requested} is below the {allocated} already allocated")]
    BelowAllocated { requested: i64, allocated: i64 },
}

/// What happens to a project's allocation row after a release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationChange {
    Shrink { remaining: i64 },
    Remove,
}

pub fn allocate(stock: Stock, quantity: i64) -> Result<Stock, LedgerError> {
    if quantity <= 0 {
        return Err(LedgerError::InvalidQuantity);
    }
    if quantity > stock.available {
        return Err(LedgerError::InsufficientAvailableQuantity {
            requested: quantity,
            available: stock.available,
        });
    }
    Ok(Stock {
        quantity: stock.quantity,
        available: stock.available - quantity,
        allocated: stock.allocated + quantity,
    })
}

/// Release `quantity` from the project's current allocation (`None` when the
/// project holds nothing of this resource).
pub fn deallocate(
    stock: Stock,
    project_id: i64,
    current_allocation: Option<i64>,
    quantity: i64,
) -> Result<(Stock, AllocationChange), LedgerError> {
    if quantity <= 0 {
        return Err(LedgerError::InvalidQuantity);
    }
    let held = current_allocation.ok_or(LedgerError::AllocationNotFound { project_id })?;
    if quantity > held {
        return Err(LedgerError::OverDeallocation {
            requested: quantity,
            allocated: held,
        });
    }

    let change = if quantity == held {
        AllocationChange::Remove
    } else {
        AllocationChange::Shrink { remaining: held - quantity }
    };
    let stock = Stock {
        quantity: stock.quantity,
        available: stock.available + quantity,
        allocated: stock.allocated - quantity,
    };
    Ok((stock, change))
}

/// Change the total while keeping current allocations intact
pub fn adjust_total(stock: Stock, new_quantity: i64) -> Result<Stock, LedgerError> {
    if new_quantity < 0 {
        return Err(LedgerError::InvalidQuantity);
    }
    if new_quantity < stock.allocated {
        return Err(LedgerError::BelowAllocated {
            requested: new_quantity,
            allocated: stock.allocated,
        });
    }
    Ok(Stock {
        quantity: new_quantity,
        available: new_quantity - stock.allocated,
        allocated: stock.allocated,
    })
}
