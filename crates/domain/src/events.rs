//! 集群通知事件
//!
//! 节点之间通过广播通知协作，通知可能丢失，接收方必须能靠轮询兜底

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClusterEvent {
    /// 调度完成，各节点开始处理自己的任务
    CopyRequested {
        origin_node_id: i32,
        migration_id: String,
    },
    /// 监控器判定迁移结束
    CopyComplete {
        origin_node_id: i32,
        migration_id: String,
    },
}

impl ClusterEvent {
    pub fn copy_requested(origin_node_id: i32, migration_id: impl Into<String>) -> Self {
        ClusterEvent::CopyRequested {
            origin_node_id,
            migration_id: migration_id.into(),
        }
    }

    pub fn copy_complete(origin_node_id: i32, migration_id: impl Into<String>) -> Self {
        ClusterEvent::CopyComplete {
            origin_node_id,
            migration_id: migration_id.into(),
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            ClusterEvent::CopyRequested { .. } => "CopyRequested",
            ClusterEvent::CopyComplete { .. } => "CopyComplete",
        }
    }

    pub fn migration_id(&self) -> &str {
        match self {
            ClusterEvent::CopyRequested { migration_id, .. }
            | ClusterEvent::CopyComplete { migration_id, .. } => migration_id,
        }
    }

    pub fn origin_node_id(&self) -> i32 {
        match self {
            ClusterEvent::CopyRequested { origin_node_id, .. }
            | ClusterEvent::CopyComplete { origin_node_id, .. } => *origin_node_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = ClusterEvent::copy_requested(3, "m-1");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "CopyRequested");
        assert_eq!(json["origin_node_id"], 3);
        assert_eq!(json["migration_id"], "m-1");
        assert_eq!(event.event_type(), "CopyRequested");
    }
}
