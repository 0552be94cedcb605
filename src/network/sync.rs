//! Chain synchronization with peers
//!
//! `ChainSync` is the single writer of the local chain. Peer messages,
//! locally mined blocks and API submissions all mutate the chain through it
//! while holding the write lock, and every mutation publishes the new tip
//! hash so an in-flight mining attempt can notice it has gone stale.
//! Whole candidate chains are validated on the blocking pool without the
//! lock and only swapped in under it.

use crate::core::{
    cumulative_work, now_millis, Block, Blockchain, ChainError, Transaction, ValidatedChain,
};
use crate::mining::{Miner, MiningError, MiningStats};
use crate::network::message::Message;
use crate::network::peer::PeerManager;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// What handling a message did to the local chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A query was answered
    Responded,
    /// Nothing to do: empty response or no more work than the local chain
    Ignored,
    /// The remote tip extended the local tip directly
    Appended,
    /// The remote tip could not be linked; the whole chain was requested
    QueriedAll,
    /// The local chain was replaced by a heavier one
    Replaced,
    /// The received block or chain failed validation
    Rejected,
}

/// Chain synchronization manager
pub struct ChainSync {
    blockchain: Arc<RwLock<Blockchain>>,
    peer_manager: Arc<PeerManager>,
    tip_tx: watch::Sender<String>,
}

impl ChainSync {
    pub fn new(blockchain: Blockchain, peer_manager: Arc<PeerManager>) -> Self {
        let (tip_tx, _) = watch::channel(blockchain.latest_block().hash.clone());
        Self {
            blockchain: Arc::new(RwLock::new(blockchain)),
            peer_manager,
            tip_tx,
        }
    }

    /// Consistent snapshot of the chain; cheap, it only clones `Arc`s
    pub async fn snapshot(&self) -> Blockchain {
        self.blockchain.read().await.clone()
    }

    /// Receiver of the published tip hash
    pub fn subscribe_tip(&self) -> watch::Receiver<String> {
        self.tip_tx.subscribe()
    }

    pub fn peer_manager(&self) -> Arc<PeerManager> {
        Arc::clone(&self.peer_manager)
    }

    fn publish_tip(&self, chain: &Blockchain) {
        self.tip_tx.send_replace(chain.latest_block().hash.clone());
    }

    /// Handle one message received from `from`
    pub async fn handle_message(&self, from: SocketAddr, msg: Message) -> SyncOutcome {
        log::debug!("Received {} from {}", msg.type_name(), from);

        match msg {
            Message::QueryLatest => {
                let tip = self.blockchain.read().await.latest_block().clone();
                self.reply(from, Message::ResponseChain(vec![tip])).await;
                SyncOutcome::Responded
            }
            Message::QueryAll => {
                let blocks = self.blockchain.read().await.blocks();
                self.reply(from, Message::ResponseChain(blocks.to_vec())).await;
                SyncOutcome::Responded
            }
            Message::ResponseChain(blocks) => self.handle_chain_response(from, blocks).await,
        }
    }

    async fn reply(&self, to: SocketAddr, msg: Message) {
        if let Err(e) = self.peer_manager.send_to(&to, msg).await {
            log::warn!("Failed to reply to {}: {}", to, e);
        }
    }

    /// Reconcile a received tip block or chain with the local chain
    pub async fn handle_chain_response(
        &self,
        from: SocketAddr,
        mut blocks: Vec<Block>,
    ) -> SyncOutcome {
        blocks.sort_by_key(|block| block.index);
        let Some(remote_tip) = blocks.last().cloned() else {
            return SyncOutcome::Ignored;
        };

        let mut chain = self.blockchain.write().await;
        let local_tip = chain.latest_block();

        if remote_tip.index <= local_tip.index {
            log::debug!(
                "Remote tip {} from {} is not ahead of local tip {}",
                remote_tip.index,
                from,
                local_tip.index
            );
            return SyncOutcome::Ignored;
        }

        log::info!(
            "Chain possibly behind: local tip {}, peer {} has {}",
            local_tip.index,
            from,
            remote_tip.index
        );

        if local_tip.hash == remote_tip.previous_hash {
            return match chain.add_block(remote_tip.clone()) {
                Ok(()) => {
                    self.publish_tip(&chain);
                    drop(chain);
                    self.peer_manager
                        .broadcast(Message::ResponseChain(vec![remote_tip]))
                        .await;
                    SyncOutcome::Appended
                }
                Err(e) => {
                    log::warn!("Rejected block {} from {}: {}", remote_tip.index, from, e);
                    SyncOutcome::Rejected
                }
            };
        }

        if blocks.len() == 1 {
            drop(chain);
            log::info!("Querying full chain from {}", from);
            self.reply(from, Message::QueryAll).await;
            return SyncOutcome::QueriedAll;
        }

        let local_work = chain.cumulative_work();
        drop(chain);

        let candidate_work = cumulative_work(&blocks);
        if candidate_work <= local_work {
            log::info!(
                "Ignoring chain from {}: work {} does not exceed local {}",
                from,
                candidate_work,
                local_work
            );
            return SyncOutcome::Ignored;
        }

        let validated =
            match tokio::task::spawn_blocking(move || ValidatedChain::validate(blocks, now_millis()))
                .await
            {
                Ok(Ok(validated)) => validated,
                Ok(Err(e)) => {
                    log::warn!("Rejected chain from {}: {}", from, e);
                    return SyncOutcome::Rejected;
                }
                Err(e) => {
                    log::warn!("Validation of chain from {} failed: {}", from, e);
                    return SyncOutcome::Rejected;
                }
            };

        let mut chain = self.blockchain.write().await;
        if !chain.install(validated) {
            return SyncOutcome::Ignored;
        }
        self.publish_tip(&chain);
        let blocks = chain.blocks();
        drop(chain);

        self.peer_manager
            .broadcast(Message::ResponseChain(blocks.to_vec()))
            .await;
        SyncOutcome::Replaced
    }

    /// Append a locally produced block and announce it as the new tip
    pub async fn submit_block(&self, block: Block) -> Result<(), ChainError> {
        let mut chain = self.blockchain.write().await;
        chain.add_block(block.clone())?;
        self.publish_tip(&chain);
        drop(chain);

        self.peer_manager
            .broadcast(Message::ResponseChain(vec![block]))
            .await;
        Ok(())
    }

    /// Mine `payload` on top of the current tip and submit the result.
    ///
    /// The search holds no lock and is abandoned if the tip moves first.
    pub async fn mine_block(
        &self,
        miner: &Miner,
        payload: Vec<Transaction>,
    ) -> Result<(Block, MiningStats), MiningError> {
        let template = {
            let chain = self.blockchain.read().await;
            miner.template(&chain, payload)
        };

        let (block, stats) = miner.mine_detached(template, self.subscribe_tip()).await?;
        self.submit_block(block.clone()).await?;
        log::info!("Mined block {} ({})", block.index, block.hash);
        Ok((block, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::peer::PeerHandle;
    use tokio::sync::mpsc;

    async fn with_fake_peer(
        chain: Blockchain,
    ) -> (ChainSync, SocketAddr, mpsc::Receiver<Message>) {
        let manager = Arc::new(PeerManager::new());
        let addr: SocketAddr = "127.0.0.1:7301".parse().unwrap();
        let (tx, rx) = mpsc::channel(16);
        manager
            .add_peer(addr, PeerHandle { addr, tx }, true)
            .await
            .unwrap();
        (ChainSync::new(chain, manager), addr, rx)
    }

    fn mine_on(chain: &mut Blockchain, count: usize, difficulty: u32) -> Vec<Block> {
        let mut mined = Vec::new();
        for _ in 0..count {
            let tip = chain.latest_block().clone();
            let block = Block::mine(
                tip.index + 1,
                &tip.hash,
                tip.timestamp + 1_000,
                Vec::new(),
                difficulty,
            )
            .unwrap();
            chain.add_block(block.clone()).unwrap();
            mined.push(block);
        }
        mined
    }

    #[tokio::test]
    async fn test_queries_are_answered() {
        let (sync, peer, mut rx) = with_fake_peer(Blockchain::new()).await;

        assert_eq!(
            sync.handle_message(peer, Message::QueryLatest).await,
            SyncOutcome::Responded
        );
        assert_eq!(
            rx.recv().await,
            Some(Message::ResponseChain(vec![Block::genesis()]))
        );

        sync.handle_message(peer, Message::QueryAll).await;
        assert_eq!(
            rx.recv().await,
            Some(Message::ResponseChain(vec![Block::genesis()]))
        );
    }

    #[tokio::test]
    async fn test_direct_append_from_tip() {
        let mut remote = Blockchain::new();
        let block1 = mine_on(&mut remote, 1, 1).remove(0);

        let (sync, peer, mut rx) = with_fake_peer(Blockchain::new()).await;
        let mut tip = sync.subscribe_tip();

        let outcome = sync
            .handle_message(peer, Message::ResponseChain(vec![block1.clone()]))
            .await;
        assert_eq!(outcome, SyncOutcome::Appended);
        assert_eq!(sync.snapshot().await.len(), 2);
        assert_eq!(rx.recv().await, Some(Message::ResponseChain(vec![block1.clone()])));

        assert!(tip.has_changed().unwrap());
        assert_eq!(*tip.borrow_and_update(), block1.hash);
    }

    #[tokio::test]
    async fn test_not_ahead_is_ignored() {
        let (sync, peer, _rx) = with_fake_peer(Blockchain::new()).await;
        assert_eq!(
            sync.handle_message(peer, Message::ResponseChain(Vec::new()))
                .await,
            SyncOutcome::Ignored
        );
        assert_eq!(
            sync.handle_message(peer, Message::ResponseChain(vec![Block::genesis()]))
                .await,
            SyncOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn test_gap_queries_all_then_replaces() {
        let mut remote = Blockchain::new();
        mine_on(&mut remote, 3, 2);
        let remote_tip = remote.latest_block().clone();

        let (sync, peer, mut rx) = with_fake_peer(Blockchain::new()).await;

        assert_eq!(
            sync.handle_message(peer, Message::ResponseChain(vec![remote_tip]))
                .await,
            SyncOutcome::QueriedAll
        );
        assert_eq!(rx.recv().await, Some(Message::QueryAll));

        // Out of order on purpose: responses are sorted before use
        let mut full = remote.blocks().to_vec();
        full.reverse();
        assert_eq!(
            sync.handle_message(peer, Message::ResponseChain(full)).await,
            SyncOutcome::Replaced
        );
        assert_eq!(*sync.snapshot().await.blocks(), *remote.blocks());
        assert_eq!(
            rx.recv().await,
            Some(Message::ResponseChain(remote.blocks().to_vec()))
        );
    }

    #[tokio::test]
    async fn test_longer_lighter_chain_ignored() {
        let mut local = Blockchain::new();
        mine_on(&mut local, 2, 3);
        let mut remote = Blockchain::new();
        mine_on(&mut remote, 3, 0);

        let (sync, peer, _rx) = with_fake_peer(local.clone()).await;
        assert_eq!(
            sync.handle_message(peer, Message::ResponseChain(remote.blocks().to_vec()))
                .await,
            SyncOutcome::Ignored
        );
        assert_eq!(*sync.snapshot().await.blocks(), *local.blocks());
    }

    #[tokio::test]
    async fn test_invalid_chain_rejected() {
        let mut remote = Blockchain::new();
        let mut blocks = vec![Block::genesis()];
        blocks.extend(mine_on(&mut remote, 2, 1));
        blocks[2].nonce += 1;

        let (sync, peer, _rx) = with_fake_peer(Blockchain::new()).await;
        assert_eq!(
            sync.handle_message(peer, Message::ResponseChain(blocks)).await,
            SyncOutcome::Rejected
        );
        assert_eq!(sync.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_mine_block_appends_and_broadcasts() {
        let (sync, _peer, mut rx) = with_fake_peer(Blockchain::new()).await;
        let miner = Miner::without_reward();

        let (block, _) = sync.mine_block(&miner, Vec::new()).await.unwrap();
        assert_eq!(block.index, 1);
        assert_eq!(sync.snapshot().await.latest_block().hash, block.hash);
        assert_eq!(rx.recv().await, Some(Message::ResponseChain(vec![block])));
    }

    #[tokio::test]
    async fn test_stale_block_rejected() {
        let (sync, _peer, _rx) = with_fake_peer(Blockchain::new()).await;
        let miner = Miner::without_reward();
        let stale = {
            let chain = sync.snapshot().await;
            let template = miner.template(&chain, Vec::new());
            Miner::mine_template(template, || false).unwrap().0
        };

        sync.mine_block(&miner, Vec::new()).await.unwrap();
        assert!(sync.submit_block(stale).await.is_err());
        assert_eq!(sync.snapshot().await.len(), 2);
    }
}
