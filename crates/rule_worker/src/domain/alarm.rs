use common::domain::{AlarmState, FiredRule};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmTransition {
    pub alarm_id: u64,
    pub from: AlarmState,
    pub to: AlarmState,
}

/// Alarm state machine keyed by alarm id.
///
/// An alarm is UP while any of its member rules is firing. Only flips are
/// reported; repeated firings of an UP alarm are no-ops.
pub struct AlarmStateTransitionManager {
    members: BTreeMap<u64, BTreeSet<u64>>,
    firing: HashMap<u64, bool>,
    states: HashMap<u64, AlarmState>,
}

impl AlarmStateTransitionManager {
    pub fn new(alarms: &BTreeMap<u64, BTreeSet<u64>>, seed: &[FiredRule]) -> Self {
        let firing: HashMap<u64, bool> = seed
            .iter()
            .map(|fact| (fact.rule_id, fact.fired))
            .collect();

        let mut manager = Self {
            members: alarms.clone(),
            firing,
            states: HashMap::new(),
        };
        let initial: Vec<(u64, AlarmState)> = manager
            .members
            .keys()
            .map(|alarm_id| (*alarm_id, manager.derive(*alarm_id)))
            .collect();
        manager.states.extend(initial);

        debug!(alarms = manager.states.len(), "seeded alarm states");
        manager
    }

    pub fn state(&self, alarm_id: u64) -> AlarmState {
        self.states.get(&alarm_id).copied().unwrap_or_default()
    }

    /// Feeds a rule fact into its alarm. Returns the transition when the state flips.
    pub fn apply(&mut self, alarm_id: u64, fact: &FiredRule) -> Option<AlarmTransition> {
        self.firing.insert(fact.rule_id, fact.fired);

        let from = self.state(alarm_id);
        let to = if self.members.contains_key(&alarm_id) {
            self.derive(alarm_id)
        } else {
            AlarmState::from_firing(fact.fired)
        };
        self.states.insert(alarm_id, to);

        (from != to).then_some(AlarmTransition { alarm_id, from, to })
    }

    fn derive(&self, alarm_id: u64) -> AlarmState {
        let any_firing = self.members.get(&alarm_id).is_some_and(|rules| {
            rules
                .iter()
                .any(|rule_id| self.firing.get(rule_id).copied().unwrap_or(false))
        });
        AlarmState::from_firing(any_firing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(rule_id: u64, fired: bool) -> FiredRule {
        FiredRule {
            rule_id,
            fired,
            last_fired_timestamp: fired.then_some(1),
        }
    }

    fn alarms() -> BTreeMap<u64, BTreeSet<u64>> {
        BTreeMap::from([(100, BTreeSet::from([8])), (200, BTreeSet::from([9, 10]))])
    }

    #[test]
    fn test_default_state_is_down() {
        let manager = AlarmStateTransitionManager::new(&alarms(), &[]);
        assert_eq!(manager.state(100), AlarmState::Down);
        assert_eq!(manager.state(999), AlarmState::Down);
    }

    #[test]
    fn test_repeated_firing_emits_single_transition() {
        let mut manager = AlarmStateTransitionManager::new(&alarms(), &[]);
        let first = manager.apply(100, &fact(8, true));
        let second = manager.apply(100, &fact(8, true));

        assert_eq!(
            first,
            Some(AlarmTransition {
                alarm_id: 100,
                from: AlarmState::Down,
                to: AlarmState::Up
            })
        );
        assert_eq!(second, None);
    }

    #[test]
    fn test_alternating_firings_flip_each_time() {
        let mut manager = AlarmStateTransitionManager::new(&alarms(), &[]);
        let flips: Vec<_> = [true, false, true, false]
            .into_iter()
            .filter_map(|fired| manager.apply(100, &fact(8, fired)))
            .map(|transition| transition.to)
            .collect();
        assert_eq!(
            flips,
            vec![
                AlarmState::Up,
                AlarmState::Down,
                AlarmState::Up,
                AlarmState::Down
            ]
        );
    }

    #[test]
    fn test_seeded_state_suppresses_repeat() {
        let mut manager = AlarmStateTransitionManager::new(&alarms(), &[fact(8, true)]);
        assert_eq!(manager.state(100), AlarmState::Up);
        assert_eq!(manager.apply(100, &fact(8, true)), None);
        assert!(manager.apply(100, &fact(8, false)).is_some());
    }

    #[test]
    fn test_alarm_stays_up_while_any_member_fires() {
        let mut manager = AlarmStateTransitionManager::new(&alarms(), &[]);
        assert!(manager.apply(200, &fact(9, true)).is_some());
        assert_eq!(manager.apply(200, &fact(10, true)), None);
        assert_eq!(manager.apply(200, &fact(9, false)), None);
        assert_eq!(
            manager.apply(200, &fact(10, false)).map(|t| t.to),
            Some(AlarmState::Down)
        );
    }
}
