use crate::domain::{
    project_table, ColumnStore, DomainResult, FiredRule, RuleStateRepository, FIRED_QUALIFIER,
    LAST_FIRED_QUALIFIER, RULE_STATE_FAMILY, RULE_STATE_TABLE,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reads the cells written by the rule-state sink back into `FiredRule` snapshots.
pub struct ColumnStoreRuleStateRepository {
    store: Arc<dyn ColumnStore>,
}

impl ColumnStoreRuleStateRepository {
    pub fn new(store: Arc<dyn ColumnStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RuleStateRepository for ColumnStoreRuleStateRepository {
    async fn load_fired_rules(&self, project_id: u64) -> DomainResult<Vec<FiredRule>> {
        let table = project_table(RULE_STATE_TABLE, project_id);
        let cells = self.store.scan_family(&table, RULE_STATE_FAMILY).await?;

        let mut rules: BTreeMap<u64, FiredRule> = BTreeMap::new();
        for cell in cells {
            let Ok(rule_id) = cell.row_key.parse::<u64>() else {
                warn!(table = %table, row_key = %cell.row_key, "skipping rule state with non-numeric row key");
                continue;
            };
            let rule = rules
                .entry(rule_id)
                .or_insert_with(|| FiredRule::unfired(rule_id));
            match cell.qualifier.as_str() {
                FIRED_QUALIFIER => rule.fired = cell.value == "true",
                LAST_FIRED_QUALIFIER => rule.last_fired_timestamp = cell.value.parse().ok(),
                _ => {}
            }
        }

        debug!(project_id, rule_count = rules.len(), "loaded persisted rule state");
        Ok(rules.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ColumnCell, DomainError, MockColumnStore};

    #[tokio::test]
    async fn test_load_groups_cells_by_rule() {
        let mut store = MockColumnStore::new();
        store
            .expect_scan_family()
            .withf(|table: &str, family: &str| table == "rule_state_3" && family == "state")
            .times(1)
            .returning(|_, _| {
                Ok(vec![
                    ColumnCell::new("12", "state", "fired", 10, "true"),
                    ColumnCell::new("12", "state", "lastFiredTimestamp", 10, "1700"),
                    ColumnCell::new("13", "state", "fired", 11, "false"),
                    ColumnCell::new("oops", "state", "fired", 11, "true"),
                ])
            });

        let repository = ColumnStoreRuleStateRepository::new(Arc::new(store));
        let rules = repository.load_fired_rules(3).await.unwrap();

        assert_eq!(
            rules,
            vec![
                FiredRule {
                    rule_id: 12,
                    fired: true,
                    last_fired_timestamp: Some(1700),
                },
                FiredRule::unfired(13),
            ]
        );
    }

    #[tokio::test]
    async fn test_load_propagates_store_errors() {
        let mut store = MockColumnStore::new();
        store
            .expect_scan_family()
            .returning(|_, _| Err(DomainError::StorageError("down".to_string())));

        let repository = ColumnStoreRuleStateRepository::new(Arc::new(store));
        assert!(repository.load_fired_rules(1).await.is_err());
    }
}
