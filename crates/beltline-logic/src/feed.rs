//! Crew-scoped action item feed and its in-memory paging.
//!
//! Action items are everything a crew may need to come back to: its own
//! in-flight submissions, reverted submissions, timed processes that are
//! (or will be) ready to finish, planned construction sites and expiring
//! lot agreements.
//!
//! # Sorting
//!
//! Sorting by `time` first groups items by a fixed type priority
//! (pending, failed, ready, unready, plan, agreement) and orders within a
//! group by finish time, falling back to the item timestamp. The sort
//! direction applies to that second key only. Every other sort field
//! compares the field directly.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::activity::{Activity, EventName};
use crate::config::EngineConfig;
use crate::entity::{BuildingStatus, EntityMatch};
use crate::ledger::{vars_contain, PendingTransaction};
use crate::location::{EntityLabel, LocationRef};
use crate::managers::Sources;
use crate::registry::{get_activity_config, FinishCall};
use crate::stage::is_due;

// ============================================================================
// ITEMS
// ============================================================================

/// Item category. Declaration order is the `time` sort priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionItemType {
    Pending,
    Failed,
    Ready,
    Unready,
    Plan,
    Agreement,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionItem {
    /// Unique within one feed.
    pub key: String,
    pub item_type: ActionItemType,
    pub label: String,
    pub asteroid_id: Option<u64>,
    pub location: Option<LocationRef>,
    pub finish_time: Option<u64>,
    pub timestamp: u64,
    pub tx_hash: Option<String>,
    /// Transaction that resolves a ready item.
    pub finish_call: Option<FinishCall>,
}

impl ActionItem {
    fn from_tx(item_type: ActionItemType, tx: &PendingTransaction, index: usize) -> Self {
        let key = match &tx.tx_hash {
            Some(hash) => format!("{:?}:{}", item_type, hash),
            None => format!("{:?}:{}#{}", item_type, tx.key, index),
        };
        let location: Option<LocationRef> = tx.meta_field("location");
        Self {
            key,
            item_type,
            label: tx.key.name().to_string(),
            asteroid_id: tx
                .meta_field("asteroid_id")
                .or_else(|| location.and_then(|l| l.asteroid_id())),
            location,
            finish_time: None,
            timestamp: tx.timestamp,
            tx_hash: tx.tx_hash.clone(),
            finish_call: None,
        }
    }

    /// Finish time, or the item timestamp for items without one.
    pub fn time_key(&self) -> u64 {
        self.finish_time.unwrap_or(self.timestamp)
    }
}

/// Events that close the action item opened by `event`.
fn resolved_by(event: EventName) -> &'static [EventName] {
    use EventName::*;
    match event {
        ConstructionStarted => &[ConstructionFinished],
        ResourceExtractionStarted => &[ResourceExtractionFinished],
        SamplingDepositStarted | SamplingDepositStartedImprove => &[SamplingDepositFinished],
        DeliveryPackaged => &[DeliverySent, DeliveryCancelled, DeliveryReceived],
        DeliverySent => &[DeliveryReceived, DeliveryCancelled],
        SurfaceScanStarted => &[SurfaceScanFinished],
        ResourceScanStarted => &[ResourceScanFinished],
        _ => &[],
    }
}

fn is_resolved(activity: &Activity, identity: &serde_json::Value, feed: &[Activity]) -> bool {
    let Some(event) = activity.event_name() else {
        return false;
    };
    let closers = resolved_by(event);
    feed.iter().any(|later| {
        later.timestamp() >= activity.timestamp()
            && later.event_name().is_some_and(|e| closers.contains(&e))
            && vars_contain(&later.event.return_values, identity)
    })
}

/// Every action item for `crew`, unsorted.
pub fn collect_action_items(
    crew: &LocationRef,
    src: &Sources,
    config: &EngineConfig,
) -> Vec<ActionItem> {
    let live = src.live_block_time;
    let mut items = Vec::new();

    for (i, tx) in src.ledger.pending.iter().enumerate() {
        items.push(ActionItem::from_tx(ActionItemType::Pending, tx, i));
    }
    for (i, tx) in src.ledger.failed.iter().enumerate() {
        items.push(ActionItem::from_tx(ActionItemType::Failed, tx, i));
    }

    let feed = &src.activities.activities;
    for (i, activity) in feed.iter().enumerate() {
        let Some(cfg) = get_activity_config(activity, src.entities, Some(crew)) else {
            continue;
        };
        let Some(item) = cfg.action_item.as_ref() else {
            continue;
        };
        if cfg.is_action_item_hidden(&src.ledger.pending) {
            continue;
        }
        if let Some(call) = &cfg.finish_call {
            if is_resolved(activity, &call.vars, feed) {
                continue;
            }
        }
        let ready = item.finish_time.map_or(true, |t| is_due(t, live));
        items.push(ActionItem {
            key: match activity.tx_hash() {
                Some(hash) => format!("activity:{}:{}", activity.event.name, hash),
                None => format!("activity:{}#{}", activity.event.name, i),
            },
            item_type: if ready {
                ActionItemType::Ready
            } else {
                ActionItemType::Unready
            },
            label: item.label.clone(),
            asteroid_id: item.asteroid_id,
            location: item.location,
            finish_time: item.finish_time,
            timestamp: activity.timestamp(),
            tx_hash: activity.tx_hash().map(str::to_string),
            finish_call: cfg.finish_call.clone(),
        });
    }

    let planned = src.entities.query(&EntityMatch::ControlledBy {
        label: EntityLabel::Building,
        controller: *crew,
    });
    for entity in planned {
        let Some(building) = entity.building.as_ref() else {
            continue;
        };
        if building.status != BuildingStatus::Planned {
            continue;
        }
        let location = entity.location_ref();
        items.push(ActionItem {
            key: format!("plan:{}", location),
            item_type: ActionItemType::Plan,
            label: "Construction Site".to_string(),
            asteroid_id: entity.location.and_then(|lot| lot.asteroid_id()),
            location: Some(location),
            finish_time: building.grace_period_end,
            timestamp: building.planned_at.unwrap_or(0),
            tx_hash: None,
            finish_call: None,
        });
    }

    let window = config.agreement_notice_window;
    for entity in src.entities.query(&EntityMatch::AgreementFor { crew: *crew }) {
        let location = entity.location_ref();
        for agreement in entity.agreements.iter().filter(|a| a.permitted == *crew) {
            let expiring = live.saturating_add(window) >= agreement.end_time
                && live <= agreement.end_time.saturating_add(window);
            if !expiring {
                continue;
            }
            items.push(ActionItem {
                key: format!("agreement:{}:{}", location, agreement.end_time),
                item_type: ActionItemType::Agreement,
                label: "Agreement Expiring".to_string(),
                asteroid_id: location
                    .asteroid_id()
                    .or_else(|| entity.location.and_then(|l| l.asteroid_id())),
                location: Some(location),
                finish_time: Some(agreement.end_time),
                timestamp: agreement.end_time,
                tx_hash: None,
                finish_call: None,
            });
        }
    }

    log::debug!("collected {} action items for {}", items.len(), crew);
    items
}

/// Snapshot of one crew's action items.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionItemFeed {
    pub items: Vec<ActionItem>,
    /// False until the activity feed has delivered its first page.
    pub loaded: bool,
}

impl ActionItemFeed {
    pub fn collect(crew: &LocationRef, src: &Sources, config: &EngineConfig) -> Self {
        Self {
            items: collect_action_items(crew, src, config),
            loaded: src.activities.loaded,
        }
    }

    /// Items asking for the crew's attention now.
    pub fn action_items(&self) -> Vec<&ActionItem> {
        self.of_types(&[
            ActionItemType::Pending,
            ActionItemType::Failed,
            ActionItemType::Ready,
        ])
    }

    pub fn ready_items(&self) -> Vec<&ActionItem> {
        self.of_types(&[ActionItemType::Ready])
    }

    /// Every item, in default `time` order.
    pub fn all_visible_items(&self) -> Vec<&ActionItem> {
        let sort = SortSpec::default();
        let mut all: Vec<&ActionItem> = self.items.iter().collect();
        all.sort_by(|a, b| compare(a, b, &sort));
        all
    }

    fn of_types(&self, types: &[ActionItemType]) -> Vec<&ActionItem> {
        self.items
            .iter()
            .filter(|i| types.contains(&i.item_type))
            .collect()
    }
}

// ============================================================================
// PAGING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Time,
    Label,
    AsteroidId,
    ItemType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(field: SortField, direction: SortDirection) -> Self {
        Self { field, direction }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActionItemFilters {
    pub asteroid: Option<u64>,
    pub status: Option<ActionItemType>,
}

impl ActionItemFilters {
    pub fn matches(&self, item: &ActionItem) -> bool {
        self.asteroid.map_or(true, |a| item.asteroid_id == Some(a))
            && self.status.map_or(true, |s| item.item_type == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    pub filters: ActionItemFilters,
    pub sort: SortSpec,
    /// 1-based.
    pub page: usize,
    pub page_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub hits: Vec<ActionItem>,
    /// Matching items across all pages.
    pub total: usize,
}

fn directed(ord: Ordering, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Asc => ord,
        SortDirection::Desc => ord.reverse(),
    }
}

fn compare(a: &ActionItem, b: &ActionItem, sort: &SortSpec) -> Ordering {
    match sort.field {
        SortField::Time => a
            .item_type
            .cmp(&b.item_type)
            .then_with(|| directed(a.time_key().cmp(&b.time_key()), sort.direction)),
        SortField::Label => directed(a.label.cmp(&b.label), sort.direction),
        SortField::AsteroidId => directed(a.asteroid_id.cmp(&b.asteroid_id), sort.direction),
        SortField::ItemType => directed(a.item_type.cmp(&b.item_type), sort.direction),
    }
}

/// Filter, sort and slice `items`.
pub fn page_action_items(items: &[ActionItem], query: &PageQuery) -> Page {
    let mut hits: Vec<&ActionItem> = items.iter().filter(|i| query.filters.matches(i)).collect();
    hits.sort_by(|a, b| compare(a, b, &query.sort));
    let total = hits.len();
    let page = query.page.max(1);
    let start = (page - 1).saturating_mul(query.page_size);
    Page {
        hits: hits
            .into_iter()
            .skip(start)
            .take(query.page_size)
            .cloned()
            .collect(),
        total,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PagedResult {
    pub data: Page,
    pub is_loading: bool,
}

/// Paging state for one action item list view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagedActionItems {
    page: usize,
    per_page: usize,
    sort: SortSpec,
    filters: ActionItemFilters,
}

impl PagedActionItems {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            page: 1,
            per_page: config.page_size,
            sort: config.default_sort,
            filters: ActionItemFilters::default(),
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn sort(&self) -> SortSpec {
        self.sort
    }

    pub fn set_page(&mut self, page: usize) {
        self.page = page.max(1);
    }

    /// Changing the sort returns to the first page.
    pub fn set_sort(&mut self, sort: SortSpec) {
        if sort != self.sort {
            self.page = 1;
        }
        self.sort = sort;
    }

    pub fn set_filters(&mut self, filters: ActionItemFilters) {
        if filters != self.filters {
            self.page = 1;
        }
        self.filters = filters;
    }

    pub fn query(&self, feed: &ActionItemFeed) -> PagedResult {
        PagedResult {
            data: page_action_items(
                &feed.items,
                &PageQuery {
                    filters: self.filters,
                    sort: self.sort,
                    page: self.page,
                    page_size: self.per_page,
                },
            ),
            is_loading: !feed.loaded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Agreement, Building, Entity};
    use crate::ledger::{Executor, TransactionKey};
    use crate::location::lot_id;
    use crate::managers::fixtures::World;
    use serde_json::json;

    fn crew() -> LocationRef {
        LocationRef::crew(1)
    }

    fn item(key: &str, item_type: ActionItemType, time: u64, asteroid: u64) -> ActionItem {
        ActionItem {
            key: key.to_string(),
            item_type,
            label: key.to_string(),
            asteroid_id: Some(asteroid),
            location: None,
            finish_time: Some(time),
            timestamp: 0,
            tx_hash: None,
            finish_call: None,
        }
    }

    fn scan_started(ts: u64, finish: u64) -> Activity {
        Activity::new(
            "SurfaceScanStarted",
            json!({
                "asteroid": { "label": "AST", "id": 1 },
                "caller_crew": { "label": "CRW", "id": 1 },
                "finish_time": finish,
            }),
            ts,
        )
        .with_tx_hash("0xscan")
    }

    #[test]
    fn test_time_sort_groups_by_type_first() {
        let items = vec![
            item("plan", ActionItemType::Plan, 1, 1),
            item("ready-late", ActionItemType::Ready, 300, 1),
            item("pending", ActionItemType::Pending, 900, 1),
            item("ready-early", ActionItemType::Ready, 100, 1),
        ];
        let query = PageQuery {
            filters: ActionItemFilters::default(),
            sort: SortSpec::new(SortField::Time, SortDirection::Desc),
            page: 1,
            page_size: 10,
        };
        let keys: Vec<_> = page_action_items(&items, &query)
            .hits
            .into_iter()
            .map(|i| i.key)
            .collect();
        assert_eq!(keys, vec!["pending", "ready-late", "ready-early", "plan"]);
    }

    #[test]
    fn test_paging_and_filters() {
        let items: Vec<_> = (0..7)
            .map(|i| item(&format!("i{}", i), ActionItemType::Ready, i, 1 + i % 2))
            .collect();
        let mut query = PageQuery {
            filters: ActionItemFilters {
                asteroid: Some(1),
                status: None,
            },
            sort: SortSpec::default(),
            page: 2,
            page_size: 3,
        };
        let page = page_action_items(&items, &query);
        assert_eq!(page.total, 4);
        assert_eq!(page.hits.len(), 1);
        assert_eq!(page.hits[0].key, "i6");

        query.page = 5;
        assert!(page_action_items(&items, &query).hits.is_empty());
    }

    #[test]
    fn test_set_sort_resets_page() {
        let mut paged = PagedActionItems::new(&EngineConfig::default());
        paged.set_page(3);
        paged.set_sort(SortSpec::new(SortField::Label, SortDirection::Asc));
        assert_eq!(paged.page(), 1);
        paged.set_page(0);
        assert_eq!(paged.page(), 1);
    }

    #[test]
    fn test_query_reports_loading() {
        let paged = PagedActionItems::new(&EngineConfig::default());
        let result = paged.query(&ActionItemFeed::default());
        assert!(result.is_loading);
        assert_eq!(result.data.total, 0);
    }

    #[test]
    fn test_collects_pending_and_failed() {
        let mut world = World::default();
        world.ledger.execute(
            TransactionKey::ScanSurfaceStart,
            json!({ "asteroid": { "label": "AST", "id": 1 } }),
            Some(json!({ "location": { "label": "AST", "id": 1 }, "asteroid_id": 1 })),
        );
        world.ledger.execute(TransactionKey::StationCrew, json!({}), None);
        let hash = world.ledger.pending[1].tx_hash.clone().unwrap();
        world.ledger.revert(&hash);

        let items = collect_action_items(&crew(), &world.sources(), &EngineConfig::default());
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].item_type, ActionItemType::Pending);
        assert_eq!(items[0].asteroid_id, Some(1));
        assert_eq!(items[1].item_type, ActionItemType::Failed);
        assert_ne!(items[0].key, items[1].key);
    }

    #[test]
    fn test_activity_item_ready_and_unready() {
        let mut world = World::default();
        world.feed.push(scan_started(100, 500));
        world.now = 499;
        let items = collect_action_items(&crew(), &world.sources(), &EngineConfig::default());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].item_type, ActionItemType::Unready);

        world.now = 500;
        let items = collect_action_items(&crew(), &world.sources(), &EngineConfig::default());
        assert_eq!(items[0].item_type, ActionItemType::Ready);
        let call = items[0].finish_call.as_ref().unwrap();
        assert_eq!(call.key, TransactionKey::ScanSurfaceFinish);
    }

    #[test]
    fn test_activity_item_hidden_then_resolved() {
        let mut world = World::default();
        world.feed.push(scan_started(100, 500));
        world.now = 600;
        world.ledger.execute(
            TransactionKey::ScanSurfaceFinish,
            json!({
                "asteroid": { "label": "AST", "id": 1 },
                "caller_crew": { "label": "CRW", "id": 1 },
            }),
            None,
        );
        let items = collect_action_items(&crew(), &world.sources(), &EngineConfig::default());
        assert!(items.iter().all(|i| i.item_type == ActionItemType::Pending));

        world.confirm_first();
        world.feed.push(Activity::new(
            "SurfaceScanFinished",
            json!({ "asteroid": { "label": "AST", "id": 1 } }),
            610,
        ));
        let items = collect_action_items(&crew(), &world.sources(), &EngineConfig::default());
        assert!(items.is_empty());
    }

    #[test]
    fn test_plans_and_expiring_agreements() {
        let mut world = World::default();
        let lot = LocationRef::lot(lot_id(1, 7));
        let mut site = Entity::new(EntityLabel::Building, 3)
            .with_location(lot)
            .with_controller(crew());
        site.building = Some(Building {
            building_type: 2,
            status: BuildingStatus::Planned,
            planned_at: Some(10),
            grace_period_end: Some(5000),
            finish_time: None,
        });
        world.store.upsert(site);

        let mut leased = Entity::new(EntityLabel::Lot, lot_id(1, 8));
        leased.agreements.push(Agreement {
            permitted: crew(),
            end_time: 2000,
        });
        leased.agreements.push(Agreement {
            permitted: crew(),
            end_time: 900_000,
        });
        world.store.upsert(leased);
        world.now = 1000;

        let feed = ActionItemFeed::collect(&crew(), &world.sources(), &EngineConfig::default());
        let types: Vec<_> = feed.all_visible_items().iter().map(|i| i.item_type).collect();
        assert_eq!(types, vec![ActionItemType::Plan, ActionItemType::Agreement]);
        let plan = feed.all_visible_items()[0].clone();
        assert_eq!(plan.finish_time, Some(5000));
        assert_eq!(plan.asteroid_id, Some(1));
        assert!(feed.action_items().is_empty());
        assert!(feed.ready_items().is_empty());
    }
}
