use serde::{Deserialize, Serialize};
use std::fmt;

use crate::amount::NativeAmount;

// ---------------------------------------------------------------------------
// ActionOp
// ---------------------------------------------------------------------------

/// Declarative description of one financial step or a composition of steps.
///
/// The JSON shape is tagged by `type` (`seq`, `par`, `swap`, `loan-borrow`,
/// `loan-deposit`, `loan-repay`, `loan-withdraw`) with camelCase fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ActionOp {
    /// Children run in array order; step N+1 starts after step N commits.
    Seq { actions: Vec<ActionOp> },
    /// Children run concurrently; all must settle before the parent is done.
    Par { actions: Vec<ActionOp> },
    Swap(SwapActionOp),
    LoanBorrow(LoanActionOp),
    LoanDeposit(LoanActionOp),
    LoanRepay(LoanActionOp),
    LoanWithdraw(LoanActionOp),
}

impl ActionOp {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionOp::Seq { .. } => ActionKind::Seq,
            ActionOp::Par { .. } => ActionKind::Par,
            ActionOp::Swap(_) => ActionKind::Swap,
            ActionOp::LoanBorrow(_) => ActionKind::LoanBorrow,
            ActionOp::LoanDeposit(_) => ActionKind::LoanDeposit,
            ActionOp::LoanRepay(_) => ActionKind::LoanRepay,
            ActionOp::LoanWithdraw(_) => ActionKind::LoanWithdraw,
        }
    }

    /// Borrow this node as either a composition or a leaf.
    pub fn as_node(&self) -> OpNode<'_> {
        match self {
            ActionOp::Seq { actions } => OpNode::Seq(actions),
            ActionOp::Par { actions } => OpNode::Par(actions),
            ActionOp::Swap(op) => OpNode::Leaf(LeafAction::Swap(op)),
            ActionOp::LoanBorrow(op) => OpNode::Leaf(LeafAction::Loan(LoanKind::Borrow, op)),
            ActionOp::LoanDeposit(op) => OpNode::Leaf(LeafAction::Loan(LoanKind::Deposit, op)),
            ActionOp::LoanRepay(op) => OpNode::Leaf(LeafAction::Loan(LoanKind::Repay, op)),
            ActionOp::LoanWithdraw(op) => OpNode::Leaf(LeafAction::Loan(LoanKind::Withdraw, op)),
        }
    }

    /// All leaves in depth-first order, paired with their step paths.
    pub fn leaves(&self) -> Vec<(StepPath, LeafAction<'_>)> {
        let mut out = Vec::new();
        collect_leaves(self, StepPath::root(), &mut out);
        out
    }
}

fn collect_leaves<'a>(op: &'a ActionOp, path: StepPath, out: &mut Vec<(StepPath, LeafAction<'a>)>) {
    match op.as_node() {
        OpNode::Seq(actions) | OpNode::Par(actions) => {
            for (i, child) in actions.iter().enumerate() {
                collect_leaves(child, path.child(i), out);
            }
        }
        OpNode::Leaf(leaf) => out.push((path, leaf)),
    }
}

/// One node of an op tree, split by what an executor has to do with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpNode<'a> {
    Seq(&'a [ActionOp]),
    Par(&'a [ActionOp]),
    Leaf(LeafAction<'a>),
}

// ---------------------------------------------------------------------------
// Leaf payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmountFor {
    /// `native_amount` is what leaves the source wallet.
    From,
    /// `native_amount` is what must arrive in the destination wallet.
    To,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapActionOp {
    pub from_wallet_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_token_id: Option<String>,
    pub to_wallet_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_token_id: Option<String>,
    pub native_amount: NativeAmount,
    pub amount_for: AmountFor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanActionOp {
    pub borrow_plugin_id: String,
    pub wallet_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    pub native_amount: NativeAmount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoanKind {
    Borrow,
    Deposit,
    Repay,
    Withdraw,
}

impl LoanKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LoanKind::Borrow => "loan-borrow",
            LoanKind::Deposit => "loan-deposit",
            LoanKind::Repay => "loan-repay",
            LoanKind::Withdraw => "loan-withdraw",
        }
    }
}

/// A borrowed view of a non-composite `ActionOp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafAction<'a> {
    Swap(&'a SwapActionOp),
    Loan(LoanKind, &'a LoanActionOp),
}

impl LeafAction<'_> {
    pub fn kind(&self) -> ActionKind {
        match self {
            LeafAction::Swap(_) => ActionKind::Swap,
            LeafAction::Loan(LoanKind::Borrow, _) => ActionKind::LoanBorrow,
            LeafAction::Loan(LoanKind::Deposit, _) => ActionKind::LoanDeposit,
            LeafAction::Loan(LoanKind::Repay, _) => ActionKind::LoanRepay,
            LeafAction::Loan(LoanKind::Withdraw, _) => ActionKind::LoanWithdraw,
        }
    }
}

// ---------------------------------------------------------------------------
// ActionKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Seq,
    Par,
    Swap,
    LoanBorrow,
    LoanDeposit,
    LoanRepay,
    LoanWithdraw,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Seq => "seq",
            ActionKind::Par => "par",
            ActionKind::Swap => "swap",
            ActionKind::LoanBorrow => "loan-borrow",
            ActionKind::LoanDeposit => "loan-deposit",
            ActionKind::LoanRepay => "loan-repay",
            ActionKind::LoanWithdraw => "loan-withdraw",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StepPath
// ---------------------------------------------------------------------------

/// Child indices from the root of an op tree down to one node.
///
/// Rendered as dot-separated indices (`0`, `1.0`); the root itself renders as
/// `root`. Used as the key of per-step journal records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepPath(Vec<usize>);

impl StepPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn child(&self, index: usize) -> Self {
        let mut v = self.0.clone();
        v.push(index);
        Self(v)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }
}

impl From<Vec<usize>> for StepPath {
    fn from(v: Vec<usize>) -> Self {
        Self(v)
    }
}

impl fmt::Display for StepPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("root");
        }
        let parts: Vec<String> = self.0.iter().map(|i| i.to_string()).collect();
        f.write_str(&parts.join("."))
    }
}

impl std::str::FromStr for StepPath {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "root" || s.is_empty() {
            return Ok(StepPath::root());
        }
        s.split('.')
            .map(|p| p.parse::<usize>())
            .collect::<Result<Vec<_>, _>>()
            .map(StepPath)
    }
}

impl Serialize for StepPath {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StepPath {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
