use migration_domain::CopyItem;
use tracing::debug;

/// 一个复制项及其分配到的节点
#[derive(Debug, Clone, PartialEq)]
pub struct TaskAssignment {
    pub item: CopyItem,
    pub node_id: i32,
}

/// 按源表行数升序做轮询分配
///
/// 小表先分配，大表因此分散到不同节点。行数为0的表总是留在发起节点，
/// 并且不占用轮询位置。节点列表为空时全部分配给发起节点。
pub fn plan_assignments(
    mut items: Vec<CopyItem>,
    node_ids: &[i32],
    local_node_id: i32,
) -> Vec<TaskAssignment> {
    items.sort_by_key(|item| item.source_row_count);

    let mut node_index = 0usize;
    items
        .into_iter()
        .map(|item| {
            let node_id = if item.source_row_count == 0 || node_ids.is_empty() {
                local_node_id
            } else {
                let node_id = node_ids[node_index % node_ids.len()];
                node_index += 1;
                node_id
            };
            debug!(
                "分配 {} ({} 行) -> 节点 {}",
                item.pipeline_name(),
                item.source_row_count,
                node_id
            );
            TaskAssignment { item, node_id }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn item(table: &str, rows: i64) -> CopyItem {
        let mut item = CopyItem::new(table, table);
        item.source_row_count = rows;
        item
    }

    #[test]
    fn test_round_robin_in_ascending_row_count_order() {
        let items = vec![
            item("huge", 1_000_000),
            item("small", 10),
            item("medium", 5_000),
            item("tiny", 1),
            item("large", 90_000),
        ];

        let plan = plan_assignments(items, &[1, 2], 1);
        let order: Vec<(&str, i32)> = plan
            .iter()
            .map(|a| (a.item.source_table.as_str(), a.node_id))
            .collect();

        assert_eq!(
            order,
            vec![("tiny", 1), ("small", 2), ("medium", 1), ("large", 2), ("huge", 1)]
        );
    }

    #[test]
    fn test_each_node_gets_floor_or_ceil_share() {
        let items: Vec<CopyItem> = (1..=11).map(|i| item(&format!("t{i}"), i * 7)).collect();
        let nodes = [3, 5, 8, 13];

        let plan = plan_assignments(items, &nodes, 3);
        let mut per_node: HashMap<i32, usize> = HashMap::new();
        for assignment in &plan {
            *per_node.entry(assignment.node_id).or_default() += 1;
        }

        assert_eq!(per_node.len(), nodes.len());
        for node in nodes {
            let count = per_node[&node];
            assert!(count == 2 || count == 3, "节点 {node} 分到 {count} 个任务");
        }
    }

    #[test]
    fn test_empty_tables_stay_on_local_node() {
        let items = vec![item("a", 0), item("b", 3), item("c", 0), item("d", 4)];

        let plan = plan_assignments(items, &[7, 8], 9);

        for assignment in &plan {
            if assignment.item.source_row_count == 0 {
                assert_eq!(assignment.node_id, 9);
            }
        }
        let non_empty: Vec<i32> = plan
            .iter()
            .filter(|a| a.item.source_row_count > 0)
            .map(|a| a.node_id)
            .collect();
        assert_eq!(non_empty, vec![7, 8]);
    }

    #[test]
    fn test_no_nodes_falls_back_to_local() {
        let plan = plan_assignments(vec![item("a", 5)], &[], 2);
        assert_eq!(plan[0].node_id, 2);
    }
}
