use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::abci_app::{AbciApp, Application};
use crate::db::SynchronizedData;
use crate::error::InternalError;
use crate::payload::Transaction;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    /// Time since the unix epoch, as stamped by the block proposer.
    pub timestamp: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Vec<u8>>,
}

impl Block {
    pub fn new(height: u64, timestamp: Duration) -> Self {
        Self {
            header: BlockHeader { height, timestamp },
            transactions: Vec::new(),
        }
    }

    pub fn with_transaction(mut self, tx: Vec<u8>) -> Self {
        self.transactions.push(tx);
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    InBlock,
    Ended,
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::Idle => "not started",
            Stage::InBlock => "in progress",
            Stage::Ended => "ended",
        }
    }
}

/// What happened to one block fed through [`RoundSequence::process_block`].
#[derive(Debug)]
pub struct BlockOutcome<E> {
    /// Index and reason of every transaction that was left out.
    pub rejected: Vec<(usize, Error)>,
    pub event: Option<E>,
}

/// Drives an [`AbciApp`] with the begin/deliver/end/commit calls of the
/// consensus engine.
#[derive(Debug)]
pub struct RoundSequence<A: Application> {
    abci_app: AbciApp<A>,
    stage: Stage,
    last_height: u64,
    block: Option<Block>,
    blocks: Vec<Block>,
    last_round_transition_height: u64,
}

impl<A: Application> RoundSequence<A> {
    pub fn new(abci_app: AbciApp<A>) -> Self {
        Self {
            abci_app,
            stage: Stage::Idle,
            last_height: 0,
            block: None,
            blocks: Vec::new(),
            last_round_transition_height: 0,
        }
    }

    pub fn setup(&mut self) -> Result<()> {
        self.abci_app.setup()
    }

    fn expect_stage(&self, stage: Stage, request: &'static str) -> Result<()> {
        if self.stage == stage {
            Ok(())
        } else {
            Err(Error::InvalidAbciRequest {
                request,
                state: self.stage.name(),
            })
        }
    }

    pub fn begin_block(&mut self, header: BlockHeader) -> Result<()> {
        self.expect_stage(Stage::Idle, "begin_block")?;
        if header.height != self.last_height + 1 {
            return Err(Error::InvalidBlockHeight {
                got: header.height,
                last: self.last_height,
            });
        }
        debug!("[SEQ] begin block {}", header.height);
        if self.abci_app.update_time(header.timestamp)?.is_some() {
            self.last_round_transition_height = header.height;
        }
        self.block = Some(Block {
            header,
            transactions: Vec::new(),
        });
        self.stage = Stage::InBlock;
        Ok(())
    }

    /// Mempool validation. Never changes any state.
    pub fn check_tx(&self, bytes: &[u8]) -> Result<()> {
        let tx = Transaction::<A::Payload>::from_bytes(bytes)?;
        self.abci_app.check_transaction(&tx)
    }

    pub fn deliver_tx(&mut self, bytes: &[u8]) -> Result<()> {
        self.expect_stage(Stage::InBlock, "deliver_tx")?;
        let tx = Transaction::<A::Payload>::from_bytes(bytes)?;
        self.abci_app.check_transaction(&tx)?;
        self.abci_app.process_transaction(tx)?;
        if let Some(block) = self.block.as_mut() {
            block.transactions.push(bytes.to_vec());
        }
        Ok(())
    }

    pub fn end_block(&mut self) -> Result<Option<A::Event>> {
        self.expect_stage(Stage::InBlock, "end_block")?;
        self.stage = Stage::Ended;
        let event = self.abci_app.end_block()?;
        if event.is_some() {
            self.last_round_transition_height = self.last_height + 1;
        }
        Ok(event)
    }

    pub fn commit(&mut self) -> Result<()> {
        self.expect_stage(Stage::Ended, "commit")?;
        if let Some(block) = self.block.take() {
            self.last_height = block.header.height;
            info!(
                "[SEQ] committed block {} with {} transactions, round height {}",
                block.header.height,
                block.transactions.len(),
                self.abci_app.current_round_height()
            );
            self.blocks.push(block);
        }
        self.stage = Stage::Idle;
        Ok(())
    }

    /// Drops the block in progress without committing it, so the same height
    /// can be started again.
    pub fn abort_block(&mut self) {
        if let Some(block) = self.block.take() {
            warn!("[SEQ] aborted block {}", block.header.height);
        }
        self.stage = Stage::Idle;
    }

    /// Runs a whole block. Transactions that fail to decode or validate, or
    /// arrive when no round is active, are left out of the block. Any other
    /// error aborts it.
    pub fn process_block(&mut self, block: &Block) -> Result<BlockOutcome<A::Event>> {
        self.begin_block(block.header)?;
        match self.run_block(block) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.abort_block();
                Err(err)
            }
        }
    }

    fn run_block(&mut self, block: &Block) -> Result<BlockOutcome<A::Event>> {
        let mut rejected = Vec::new();
        for (i, bytes) in block.transactions.iter().enumerate() {
            match self.deliver_tx(bytes) {
                Ok(()) => {}
                Err(err @ Error::InvalidTransaction(_))
                | Err(err @ Error::Encoding(_))
                | Err(err @ Error::Internal(InternalError::NoActiveRound)) => {
                    warn!("[SEQ] rejected tx {} of block {}: {}", i, block.header.height, err);
                    rejected.push((i, err));
                }
                Err(err) => return Err(err),
            }
        }
        let event = self.end_block()?;
        self.commit()?;
        Ok(BlockOutcome { rejected, event })
    }

    pub fn abci_app(&self) -> &AbciApp<A> {
        &self.abci_app
    }

    pub fn abci_app_mut(&mut self) -> &mut AbciApp<A> {
        &mut self.abci_app
    }

    pub fn height(&self) -> u64 {
        self.last_height
    }

    pub fn last_round_transition_height(&self) -> u64 {
        self.last_round_transition_height
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn current_round_height(&self) -> u64 {
        self.abci_app.current_round_height()
    }

    pub fn synchronized_data(&self) -> &SynchronizedData {
        self.abci_app.synchronized_data()
    }
}
