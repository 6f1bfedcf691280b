//! Redis key naming.

use reconmc_core::model::QueueId;

pub const QUEUE_PENDING: &str = "reconmc:queue:pending";
pub const QUEUE_PROCESSING: &str = "reconmc:queue:processing";
pub const QUEUE_DUPLICATES: &str = "reconmc:queue:duplicates";
pub const AGENTS_ONLINE: &str = "reconmc:agents:online";

pub fn queue_item(id: QueueId) -> String {
    format!("reconmc:queue:item:{}", id.0)
}

pub fn agent_heartbeat(agent_id: &str) -> String {
    format!("reconmc:agent:heartbeat:{agent_id}")
}

pub fn agent_data(agent_id: &str) -> String {
    format!("reconmc:agent:data:{agent_id}")
}
