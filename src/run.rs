//! Run lifecycle: connection, optional transaction, and per-row execution.
//!
//! A run moves through `Idle -> Connected -> (TxOpen | NoTx) -> Executing`
//! and ends `Committed`, `RolledBack` or `Closed`. Rows execute strictly in
//! input order over the one session the run owns.
//!
//! Without a transaction every row commits on its own, so a failure on row N
//! leaves rows before N in the table and never attempts the rows after it.

use std::fmt;

use crate::backend::{Connector, Session};
use crate::error::InsertError;
use crate::executor;
use crate::expression::{ItemResolver, ValueResolver};
use crate::items::{InputItem, RowResult};
use crate::statement::PreparedStatement;

/// Where a run currently is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Connected,
    TxOpen,
    NoTx,
    Executing,
    Committed,
    RolledBack,
    Closed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Connected => "connected",
            RunState::TxOpen => "tx-open",
            RunState::NoTx => "no-tx",
            RunState::Executing => "executing",
            RunState::Committed => "committed",
            RunState::RolledBack => "rolled-back",
            RunState::Closed => "closed",
        };
        write!(f, "{}", name)
    }
}

/// Options chosen per run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Wrap all rows in one transaction
    pub use_transaction: bool,
}

/// The session a run owns plus its lifecycle state
pub struct RunContext<S: Session> {
    session: S,
    state: RunState,
    use_transaction: bool,
    transaction_open: bool,
}

impl<S: Session> RunContext<S> {
    fn new(session: S, use_transaction: bool) -> Self {
        Self {
            session,
            state: RunState::Connected,
            use_transaction,
            transaction_open: false,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn use_transaction(&self) -> bool {
        self.use_transaction
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_open
    }

    pub(crate) fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    fn transition(&mut self, next: RunState) {
        tracing::trace!(from = %self.state, to = %next, "Run state change");
        self.state = next;
    }

    fn open(&mut self) -> Result<(), InsertError> {
        if self.use_transaction {
            self.session
                .begin_transaction()
                .map_err(InsertError::Connection)?;
            self.transaction_open = true;
            self.transition(RunState::TxOpen);
        } else {
            self.transition(RunState::NoTx);
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), InsertError> {
        if self.transaction_open {
            self.session.commit().map_err(InsertError::Commit)?;
            self.transaction_open = false;
            self.transition(RunState::Committed);
        }
        Ok(())
    }

    /// Best-effort rollback; a failure is logged and otherwise ignored
    fn abort(&mut self) {
        if !self.transaction_open {
            return;
        }
        match self.session.rollback() {
            Ok(()) => {
                self.transaction_open = false;
                self.transition(RunState::RolledBack);
                tracing::info!("Transaction rolled back");
            }
            Err(e) => {
                tracing::warn!("{}", InsertError::Rollback(e));
            }
        }
    }

    /// Release the session; a failure is logged and otherwise ignored
    fn close(self) {
        let state = self.state;
        if let Err(e) = self.session.close() {
            tracing::warn!(state = %state, "Failed to close connection: {}", e);
        }
        tracing::trace!(from = %state, to = %RunState::Closed, "Run state change");
    }
}

/// One insert run of a prepared statement over a set of input items
pub struct InsertRun<'a> {
    statement: &'a PreparedStatement,
    options: RunOptions,
}

impl<'a> InsertRun<'a> {
    pub fn new(statement: &'a PreparedStatement, options: RunOptions) -> Self {
        Self { statement, options }
    }

    /// Insert every item, resolving values through `resolver`.
    ///
    /// Returns one result per item in input order. On failure the first
    /// error is returned after any rollback and after the session is closed.
    pub fn execute<C, R>(
        &self,
        connector: &C,
        resolver: &R,
        items: &[InputItem],
    ) -> Result<Vec<RowResult>, InsertError>
    where
        C: Connector,
        R: ValueResolver + ?Sized,
    {
        tracing::info!(
            table = %self.statement.table(),
            rows = items.len(),
            use_transaction = self.options.use_transaction,
            "Starting insert run"
        );

        let session = connector.connect().map_err(InsertError::Connection)?;
        let mut context = RunContext::new(session, self.options.use_transaction);

        let outcome = self.execute_rows(&mut context, resolver, items);
        if let Err(e) = &outcome {
            tracing::error!(state = %context.state(), "Insert run failed: {}", e);
            context.abort();
        }
        context.close();

        if let Ok(results) = &outcome {
            tracing::info!(rows = results.len(), "Insert run complete");
        }
        outcome
    }

    fn execute_rows<S, R>(
        &self,
        context: &mut RunContext<S>,
        resolver: &R,
        items: &[InputItem],
    ) -> Result<Vec<RowResult>, InsertError>
    where
        S: Session,
        R: ValueResolver + ?Sized,
    {
        context.open()?;
        context.transition(RunState::Executing);

        let mut results = Vec::with_capacity(items.len());
        for (row, item) in items.iter().enumerate() {
            let affected = executor::execute_row(self.statement, row, resolver, context)?;
            results.push(RowResult::from_item(item, affected));
        }

        context.commit()?;
        Ok(results)
    }
}

/// A validated statement together with its run options
#[derive(Debug, Clone, PartialEq)]
pub struct InsertPlan {
    pub statement: PreparedStatement,
    pub options: RunOptions,
}

impl InsertPlan {
    /// Run the plan, evaluating each column's configured expression per item
    pub fn execute<C: Connector>(
        &self,
        connector: &C,
        items: &[InputItem],
    ) -> Result<Vec<RowResult>, InsertError> {
        let resolver = ItemResolver::new(&self.statement, items);
        InsertRun::new(&self.statement, self.options).execute(connector, &resolver, items)
    }
}
