//! Per-server statistics, post-processing parameters and script statuses

use crate::types::ScriptStatus;

/// Success/failure article counts for one news server
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServerStat {
    /// Server id as configured in the transport
    pub server_id: i32,
    /// Articles fetched successfully from this server
    pub success_articles: i32,
    /// Articles that failed on this server
    pub failed_articles: i32,
}

/// How a stat update combines with the existing entry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatOp {
    /// Replace the counters
    Set,
    /// Add to the counters
    Add,
    /// Subtract from the counters
    Subtract,
}

/// List of per-server statistics, one entry per server id
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerStatList(pub Vec<ServerStat>);

impl ServerStatList {
    /// Apply one update for a server, creating the entry when missing
    pub fn stat_op(&mut self, server_id: i32, success: i32, failed: i32, op: StatOp) {
        let stat = match self.0.iter_mut().find(|s| s.server_id == server_id) {
            Some(stat) => stat,
            None => {
                self.0.push(ServerStat {
                    server_id,
                    ..Default::default()
                });
                self.0.last_mut().unwrap_or_else(|| unreachable!())
            }
        };

        match op {
            StatOp::Set => {
                stat.success_articles = success;
                stat.failed_articles = failed;
            }
            StatOp::Add => {
                stat.success_articles += success;
                stat.failed_articles += failed;
            }
            StatOp::Subtract => {
                stat.success_articles -= success;
                stat.failed_articles -= failed;
            }
        }
    }

    /// Fold another stat list into this one
    pub fn list_op(&mut self, other: &ServerStatList, op: StatOp) {
        for stat in &other.0 {
            self.stat_op(stat.server_id, stat.success_articles, stat.failed_articles, op);
        }
    }

    /// Remove all entries
    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// One named post-processing parameter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NzbParameter {
    /// Parameter name, unique within the list (case-insensitive)
    pub name: String,
    /// Parameter value
    pub value: String,
}

/// Ordered list of post-processing parameters, unique by name.
///
/// Setting an empty value removes the parameter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NzbParameterList(pub Vec<NzbParameter>);

impl NzbParameterList {
    /// Set, replace or (with an empty value) remove a parameter
    pub fn set_parameter(&mut self, name: &str, value: &str) {
        let pos = self
            .0
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name));

        match pos {
            Some(index) if value.is_empty() => {
                self.0.remove(index);
            }
            Some(index) => {
                self.0[index].value = value.to_string();
            }
            None if !value.is_empty() => {
                self.0.push(NzbParameter {
                    name: name.to_string(),
                    value: value.to_string(),
                });
            }
            None => {}
        }
    }

    /// Find a parameter by name (case-insensitive)
    pub fn find(&self, name: &str) -> Option<&NzbParameter> {
        self.0.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Merge another list into this one, overwriting matching names
    pub fn copy_from(&mut self, other: &NzbParameterList) {
        for param in &other.0 {
            self.set_parameter(&param.name, &param.value);
        }
    }
}

/// Recorded outcome of one post-processing script
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptStatusEntry {
    /// Script name
    pub name: String,
    /// Outcome
    pub status: ScriptStatus,
}

/// Script outcomes of a job
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScriptStatusList(pub Vec<ScriptStatusEntry>);

impl ScriptStatusList {
    /// Aggregate status over all scripts; any failure overrides success
    pub fn calc_total_status(&self) -> ScriptStatus {
        let mut status = ScriptStatus::None;
        for entry in &self.0 {
            if (entry.status == ScriptStatus::Success && status == ScriptStatus::None)
                || entry.status == ScriptStatus::Failure
            {
                status = entry.status;
            }
        }
        status
    }

    /// Remove all entries
    pub fn clear(&mut self) {
        self.0.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_op_creates_and_accumulates() {
        let mut stats = ServerStatList::default();
        stats.stat_op(1, 5, 1, StatOp::Add);
        stats.stat_op(1, 2, 0, StatOp::Add);
        stats.stat_op(2, 1, 1, StatOp::Set);

        assert_eq!(stats.0.len(), 2);
        assert_eq!(stats.0[0].success_articles, 7);
        assert_eq!(stats.0[0].failed_articles, 1);
        assert_eq!(stats.0[1].success_articles, 1);
    }

    #[test]
    fn list_op_subtract_reverses_add() {
        let mut base = ServerStatList::default();
        base.stat_op(1, 10, 2, StatOp::Set);

        let mut delta = ServerStatList::default();
        delta.stat_op(1, 3, 1, StatOp::Set);

        base.list_op(&delta, StatOp::Add);
        base.list_op(&delta, StatOp::Subtract);
        assert_eq!(base.0[0].success_articles, 10);
        assert_eq!(base.0[0].failed_articles, 2);
    }

    #[test]
    fn parameters_are_unique_case_insensitively() {
        let mut params = NzbParameterList::default();
        params.set_parameter("*Unpack:", "yes");
        params.set_parameter("*unpack:", "no");

        assert_eq!(params.0.len(), 1);
        assert_eq!(params.0[0].value, "no");
    }

    #[test]
    fn empty_value_removes_parameter() {
        let mut params = NzbParameterList::default();
        params.set_parameter("Script:", "yes");
        params.set_parameter("Script:", "");
        assert!(params.find("Script:").is_none());
    }

    #[test]
    fn parameter_order_is_insertion_order() {
        let mut params = NzbParameterList::default();
        params.set_parameter("b", "1");
        params.set_parameter("a", "2");
        let names: Vec<&str> = params.0.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["b", "a"]);
    }

    #[test]
    fn script_failure_overrides_success() {
        let mut statuses = ScriptStatusList::default();
        statuses.0.push(ScriptStatusEntry {
            name: "first".to_string(),
            status: ScriptStatus::Success,
        });
        assert_eq!(statuses.calc_total_status(), ScriptStatus::Success);

        statuses.0.push(ScriptStatusEntry {
            name: "second".to_string(),
            status: ScriptStatus::Failure,
        });
        assert_eq!(statuses.calc_total_status(), ScriptStatus::Failure);
    }
}
