use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use switchyard_core::{Priority, Task, TenantId};

use crate::error::StoreError;
use crate::queue::FairQueue;

/// In-memory fair queue.
#[derive(Debug, Default)]
pub struct InMemoryFairQueue {
    queues: Mutex<HashMap<String, QueueState>>,
}

impl InMemoryFairQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// In-flight counter of `tenant_id`, or `None` if it is not in rotation.
    pub fn in_flight(&self, queue: &str, tenant_id: TenantId) -> Result<Option<u64>, StoreError> {
        let queues = self.queues.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(queues
            .get(queue)
            .and_then(|q| q.active.get(&tenant_id))
            .map(|a| a.in_flight))
    }

    /// Tenants currently in rotation, head first.
    pub fn rotation(&self, queue: &str) -> Result<Vec<TenantId>, StoreError> {
        let queues = self.queues.lock().map_err(|_| StoreError::Poisoned)?;
        let Some(state) = queues.get(queue) else {
            return Ok(Vec::new());
        };

        let mut tenants: Vec<_> = state.active.iter().collect();
        tenants.sort_by_key(|(_, a)| a.rank());
        Ok(tenants.into_iter().map(|(t, _)| *t).collect())
    }
}

#[async_trait]
impl FairQueue for InMemoryFairQueue {
    async fn push(&self, queue: &str, task: &Task, priority: Priority) -> Result<(), StoreError> {
        let mut queues = self.queues.lock().map_err(|_| StoreError::Poisoned)?;
        queues
            .entry(queue.to_string())
            .or_default()
            .push(task.clone(), priority);
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<Option<Task>, StoreError> {
        let mut queues = self.queues.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(queues.get_mut(queue).and_then(QueueState::pop))
    }

    async fn complete(&self, queue: &str, tenant_id: TenantId) -> Result<(), StoreError> {
        let mut queues = self.queues.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(state) = queues.get_mut(queue) {
            state.complete(tenant_id);
        }
        Ok(())
    }

    async fn size(&self, queue: &str) -> Result<usize, StoreError> {
        let queues = self.queues.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(queues.get(queue).map_or(0, QueueState::size))
    }
}

#[derive(Debug, Clone, Copy)]
struct ActiveTenant {
    in_flight: u64,
    /// Rotation position: stamped on activation and again on every pop.
    turn: u64,
}

impl ActiveTenant {
    fn rank(&self) -> (u64, u64) {
        (self.in_flight, self.turn)
    }
}

/// Sub-queue key: (score, insertion sequence). The sequence keeps equal
/// scores in FIFO order.
type SubQueue = BTreeMap<(i64, u64), Task>;

#[derive(Debug, Default)]
struct QueueState {
    active: HashMap<TenantId, ActiveTenant>,
    pending: HashMap<TenantId, SubQueue>,
    next_turn: u64,
    next_insert: u64,
}

impl QueueState {
    fn push(&mut self, task: Task, priority: Priority) {
        let tenant_id = task.tenant_id;
        let seq = self.next_insert;
        self.next_insert += 1;

        self.pending
            .entry(tenant_id)
            .or_default()
            .insert((task.score(priority), seq), task);

        if !self.active.contains_key(&tenant_id) {
            let turn = self.take_turn();
            self.active.insert(tenant_id, ActiveTenant { in_flight: 0, turn });
        }
    }

    fn take_turn(&mut self) -> u64 {
        let turn = self.next_turn;
        self.next_turn += 1;
        turn
    }

    fn head(&self) -> Option<TenantId> {
        self.active
            .iter()
            .min_by_key(|(_, a)| a.rank())
            .map(|(t, _)| *t)
    }

    fn pop(&mut self) -> Option<Task> {
        while let Some(tenant_id) = self.head() {
            let next = self
                .pending
                .get_mut(&tenant_id)
                .and_then(|q| q.pop_first())
                .map(|(_, task)| task);

            match next {
                Some(task) => {
                    // Served: move to the back among equally loaded tenants.
                    let turn = self.take_turn();
                    if let Some(active) = self.active.get_mut(&tenant_id) {
                        active.in_flight += 1;
                        active.turn = turn;
                    }
                    return Some(task);
                }
                None => {
                    // Drained: leave the rotation and pick again.
                    self.active.remove(&tenant_id);
                    self.pending.remove(&tenant_id);
                }
            }
        }
        None
    }

    fn complete(&mut self, tenant_id: TenantId) {
        if let Some(active) = self.active.get_mut(&tenant_id) {
            active.in_flight = active.in_flight.saturating_sub(1);
        }
    }

    fn size(&self) -> usize {
        self.active
            .keys()
            .filter_map(|t| self.pending.get(t))
            .map(BTreeMap::len)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::queue::enqueue;
    use proptest::prelude::*;

    const Q: &str = "batch";

    fn task(tenant: i64, n: usize) -> Task {
        Task::new("test", TenantId::new(tenant), serde_json::json!({ "n": n }))
    }

    async fn drain(queue: &InMemoryFairQueue) -> Vec<Task> {
        let mut out = Vec::new();
        while let Some(task) = queue.pop(Q).await.unwrap() {
            out.push(task);
        }
        out
    }

    #[tokio::test]
    async fn empty_queue_pops_nothing() {
        let queue = InMemoryFairQueue::new();
        assert!(queue.pop(Q).await.unwrap().is_none());
        assert_eq!(queue.size(Q).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn enqueue_accepts_unsized_payloads_through_a_trait_object() {
        let queue = InMemoryFairQueue::new();
        let dyn_queue: &dyn FairQueue = &queue;

        let queued = enqueue(dyn_queue, Q, "note", TenantId::new(4), "call back", Priority::Default)
            .await
            .unwrap();
        let ids: &[i64] = &[1, 2];
        enqueue(dyn_queue, Q, "batch", TenantId::new(4), ids, Priority::Default)
            .await
            .unwrap();

        let popped = drain(&queue).await;
        assert_eq!(popped[0].id, queued.id);
        assert_eq!(popped[0].payload, "call back");
        assert_eq!(popped[1].payload, serde_json::json!([1, 2]));
    }

    #[tokio::test]
    async fn small_tenant_is_not_starved_by_a_large_one() {
        let queue = InMemoryFairQueue::new();
        for n in 0..50 {
            queue.push(Q, &task(1, n), Priority::Default).await.unwrap();
        }
        queue.push(Q, &task(2, 0), Priority::Default).await.unwrap();
        assert_eq!(queue.size(Q).await.unwrap(), 51);

        let order: Vec<i64> = drain(&queue).await.iter().map(|t| t.tenant_id.get()).collect();
        let b_at = order.iter().position(|t| *t == 2).unwrap();
        assert!(b_at <= 1, "tenant 2 served at position {b_at}");
    }

    #[tokio::test]
    async fn late_tenant_is_served_within_the_first_rounds() {
        let queue = InMemoryFairQueue::new();
        for n in 0..3 {
            enqueue(&queue, Q, "test", TenantId::new(7), &n, Priority::Default)
                .await
                .unwrap();
        }
        enqueue(&queue, Q, "test", TenantId::new(3), &0, Priority::Default)
            .await
            .unwrap();

        let mut order = Vec::new();
        for _ in 0..4 {
            order.push(queue.pop(Q).await.unwrap().unwrap().tenant_id.get());
        }
        let pos = order.iter().position(|t| *t == 3).unwrap();
        assert!(pos < 3, "pop order {order:?}");
    }

    #[tokio::test]
    async fn serial_consumer_still_rotates_tenants() {
        let queue = InMemoryFairQueue::new();
        for n in 0..3 {
            queue.push(Q, &task(1, n), Priority::Default).await.unwrap();
        }
        for n in 0..3 {
            queue.push(Q, &task(2, n), Priority::Default).await.unwrap();
        }

        // Complete each task before the next pop, as a one-worker pool does.
        let mut order = Vec::new();
        while let Some(task) = queue.pop(Q).await.unwrap() {
            order.push(task.tenant_id.get());
            queue.complete(Q, task.tenant_id).await.unwrap();
        }
        assert_eq!(order, vec![1, 2, 1, 2, 1, 2]);
    }

    #[tokio::test]
    async fn tenant_with_fewer_running_tasks_goes_first() {
        let queue = InMemoryFairQueue::new();
        for n in 0..3 {
            queue.push(Q, &task(1, n), Priority::Default).await.unwrap();
            queue.push(Q, &task(2, n), Priority::Default).await.unwrap();
        }

        // One task each in flight; tenant 1 finishes first.
        assert_eq!(queue.pop(Q).await.unwrap().unwrap().tenant_id.get(), 1);
        assert_eq!(queue.pop(Q).await.unwrap().unwrap().tenant_id.get(), 2);
        queue.complete(Q, TenantId::new(1)).await.unwrap();

        assert_eq!(queue.pop(Q).await.unwrap().unwrap().tenant_id.get(), 1);
    }

    #[tokio::test]
    async fn priority_overrides_fifo_within_a_tenant() {
        let queue = InMemoryFairQueue::new();
        let normal = task(1, 0);
        let urgent = task(1, 1);
        let lazy = task(1, 2);
        queue.push(Q, &lazy, Priority::Low).await.unwrap();
        queue.push(Q, &normal, Priority::Default).await.unwrap();
        queue.push(Q, &urgent, Priority::High).await.unwrap();

        let ids: Vec<_> = drain(&queue).await.into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![urgent.id, normal.id, lazy.id]);
    }

    #[tokio::test]
    async fn over_completing_clamps_at_zero() {
        let queue = InMemoryFairQueue::new();
        let tenant = TenantId::new(5);
        queue.push(Q, &task(5, 0), Priority::Default).await.unwrap();
        queue.push(Q, &task(5, 1), Priority::Default).await.unwrap();
        queue.pop(Q).await.unwrap().unwrap();

        for _ in 0..3 {
            queue.complete(Q, tenant).await.unwrap();
        }
        assert_eq!(queue.in_flight(Q, tenant).unwrap(), Some(0));

        // Completing a tenant that is not even in rotation is a no-op.
        queue.complete(Q, TenantId::new(99)).await.unwrap();
        queue.complete("other", tenant).await.unwrap();
    }

    #[tokio::test]
    async fn drained_tenant_leaves_the_rotation() {
        let queue = InMemoryFairQueue::new();
        queue.push(Q, &task(1, 0), Priority::Default).await.unwrap();
        queue.push(Q, &task(2, 0), Priority::Default).await.unwrap();

        queue.pop(Q).await.unwrap().unwrap();
        queue.pop(Q).await.unwrap().unwrap();
        assert_eq!(queue.rotation(Q).unwrap().len(), 2);

        assert!(queue.pop(Q).await.unwrap().is_none());
        assert!(queue.rotation(Q).unwrap().is_empty());
    }

    #[tokio::test]
    async fn named_queues_are_independent() {
        let queue = InMemoryFairQueue::new();
        queue.push("batch", &task(1, 0), Priority::Default).await.unwrap();

        assert!(queue.pop("handler").await.unwrap().is_none());
        assert_eq!(queue.size("batch").await.unwrap(), 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Push(i64),
        Pop,
        Complete(i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => (0i64..5).prop_map(Op::Push),
            2 => Just(Op::Pop),
            1 => (0i64..5).prop_map(Op::Complete),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: under a single consumer every pushed task is popped
        /// exactly once, and a pop never comes from a tenant with nothing
        /// pending.
        #[test]
        fn single_consumer_neither_loses_nor_duplicates(ops in prop::collection::vec(op(), 1..200)) {
            let mut state = QueueState::default();
            let mut pending: HashMap<i64, usize> = HashMap::new();
            let mut pushed = HashSet::new();
            let mut popped = HashSet::new();

            let mut n = 0;
            for op in ops {
                match op {
                    Op::Push(tenant) => {
                        let t = task(tenant, n);
                        n += 1;
                        pushed.insert(t.id);
                        *pending.entry(tenant).or_default() += 1;
                        state.push(t, Priority::Default);
                    }
                    Op::Pop => match state.pop() {
                        Some(t) => {
                            let left = pending.get_mut(&t.tenant_id.get()).unwrap();
                            prop_assert!(*left > 0);
                            *left -= 1;
                            prop_assert!(popped.insert(t.id), "duplicate pop");
                        }
                        None => prop_assert!(pending.values().all(|n| *n == 0)),
                    },
                    Op::Complete(tenant) => state.complete(TenantId::new(tenant)),
                }
                prop_assert_eq!(state.size(), pending.values().sum::<usize>());
            }

            while let Some(t) = state.pop() {
                prop_assert!(popped.insert(t.id), "duplicate pop");
            }
            prop_assert_eq!(pushed, popped);
        }

        /// Property: with nothing completed, tenants are served round robin,
        /// so no tenant is ever more than one pop ahead of another that still
        /// has work.
        #[test]
        fn pops_rotate_across_tenants(depths in prop::collection::vec(1usize..20, 1..6)) {
            let mut state = QueueState::default();
            for (tenant, depth) in depths.iter().enumerate() {
                for n in 0..*depth {
                    state.push(task(tenant as i64, n), Priority::Default);
                }
            }

            let mut served: HashMap<i64, usize> = HashMap::new();
            while let Some(t) = state.pop() {
                let tenant = t.tenant_id.get();
                let mine = served.get(&tenant).copied().unwrap_or(0);
                for (other, depth) in depths.iter().enumerate() {
                    let theirs = served.get(&(other as i64)).copied().unwrap_or(0);
                    if theirs < *depth {
                        prop_assert!(mine <= theirs + 1);
                    }
                }
                *served.entry(tenant).or_default() += 1;
            }
        }
    }
}
