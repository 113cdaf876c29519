//! Shared constants: store key layout, registry table names, connection
//! roles, and lifecycle timing.

/// Key prefix for action hashes (`Action:<name>:<id>`).
pub const ACTION_KEY_PREFIX: &str = "Action";

/// Key prefix for event hashes (`Event:<name>:<id>`).
pub const EVENT_KEY_PREFIX: &str = "Event";

/// Hash mapping action name to its stored configuration.
pub const ACTION_CONFIGURATION_TABLE: &str = "ActionConfigurationByActionName";

/// Hash mapping action name to its extendable configuration.
pub const EXTENDABLE_ACTION_CONFIGURATION_TABLE: &str =
    "ExtendableActionConfigurationByActionName";

/// Hash mapping action name to the queue it is published on.
pub const ACTION_QUEUE_NAME_TABLE: &str = "ActionQueueNameByActionName";

/// Set of every queue name registered by any engine.
pub const ACTION_QUEUE_NAME_SET: &str = "ActionQueueNameSet";

/// Hash mapping resource type to its stored structure.
pub const RESOURCE_STRUCTURE_TABLE: &str = "ResourceStructureByResourceType";

/// Sentinel key guarding the once-per-generation store verification.
pub const VERIFICATION_SENTINEL_KEY: &str = "RedisConnectionVerified";

/// Sentinel TTL: one verification per seven-hour window.
pub const VERIFICATION_SENTINEL_TTL_MS: i64 = 7 * 60 * 60 * 1000;

/// Action hash TTL, refreshed on every write.
pub const ACTION_TTL_MS: i64 = 3_600_000;

/// Event hash / retention-index TTL.
pub const EVENT_TTL_MS: i64 = 300_000;

/// Process exit code when keyspace notifications are misconfigured.
pub const EXIT_CODE_KEYSPACE_MISCONFIGURED: i32 = 699;

/// The `notify-keyspace-events` classes the engine requires.
pub const REQUIRED_KEYSPACE_EVENTS: &str = "AKE";

/// Connection role for the per-action response subscriber.
pub const ACTION_SUBSCRIBER_ROLE: &str = "ActionSubscriber";

/// Handler context name designating the engine itself.
pub const SELF_CONTEXT_NAME: &str = "Self";

/// Signature sentinel that passes the entire message to the handler.
pub const OPTIONS_ARGUMENT: &str = "options";

/// Signature sentinel resolved from the action's origin metadata.
pub const ORIGIN_USER_ID_ARGUMENT: &str = "origin_user_id";

/// The single namespace function admitted by the template evaluator.
pub const RESOURCE_MODEL_FUNCTION: &str =
    "generate_resource_model_from_resource_structure_by_resource_type";

/// Connection role for a queue's blocking-pop handler connection.
pub fn queue_handler_role(queue_name: &str) -> String {
    format!("{queue_name}Handler")
}

/// Connection role for a queue's keyspace-notification subscriber.
pub fn queue_subscriber_role(queue_name: &str) -> String {
    format!("{queue_name}Subscriber")
}

/// Keyspace-notification channel for a key in the given database.
pub fn keyspace_channel(database: i64, key: &str) -> String {
    format!("__keyspace@{database}__:{key}")
}
