use crate::utils::error::{HierflowError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One op in a compiled node and the registers feeding its operands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecNodeProto {
    pub op_name: String,
    #[serde(default)]
    pub bn_in_op2regst_desc_id: HashMap<String, i64>,
}

/// Compiled description of one node, as handed to an actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProto {
    pub task_id: i64,
    #[serde(default = "default_forward")]
    pub is_forward: bool,
    pub exec_sequence: Vec<ExecNodeProto>,
}

fn default_forward() -> bool {
    true
}

impl ExecNodeProto {
    pub fn new(op_name: &str, bindings: &[(&str, i64)]) -> Self {
        Self {
            op_name: op_name.to_string(),
            bn_in_op2regst_desc_id: bindings.iter().map(|(bn, id)| (bn.to_string(), *id)).collect(),
        }
    }
}

impl TaskProto {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| HierflowError::MalformedDescriptor(format!("task proto: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| HierflowError::MalformedDescriptor(format!("task proto: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() -> Result<()> {
        let task = TaskProto::from_json(
            r#"{"task_id": 3, "exec_sequence": [{"op_name": "add", "bn_in_op2regst_desc_id": {"a": 1}}]}"#,
        )?;
        assert!(task.is_forward);
        assert_eq!(task.exec_sequence[0], ExecNodeProto::new("add", &[("a", 1)]));
        Ok(())
    }

    #[test]
    fn test_json_uses_task_id_key() -> Result<()> {
        let task = TaskProto { task_id: 7, is_forward: false, exec_sequence: Vec::new() };
        let value: serde_json::Value = serde_json::from_str(&task.to_json()?)
            .map_err(|e| HierflowError::MalformedDescriptor(e.to_string()))?;
        assert_eq!(value["task_id"], 7);
        assert!(value.get("id").is_none());
        // A bare `id` is not accepted in place of `task_id`.
        assert!(TaskProto::from_json(r#"{"id": 7, "exec_sequence": []}"#).is_err());
        Ok(())
    }

    #[test]
    fn test_reject_garbage() {
        assert!(matches!(
            TaskProto::from_json("{\"task_id\": \"x\"}"),
            Err(HierflowError::MalformedDescriptor(_))
        ));
    }
}
