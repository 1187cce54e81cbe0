use invar_domain::StateDetails;
use invar_schema::{args, WorkerField};
use serde_json::json;

/// A named class of Hardware: the set of workers that apply to it plus the
/// property fields it contributes generically.
pub trait HardwareType: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Workers that can be enabled for this hardware type. Worker tasks are
    /// created from this list at enroll time.
    fn enabled_workers(&self) -> &'static [&'static str];

    fn default_fields(&self) -> Vec<WorkerField> {
        Vec::new()
    }

    /// Property values this type pins; applied last on create and rejected
    /// on update, so the end-user can never choose a different value.
    fn worker_overrides(&self) -> StateDetails {
        StateDetails::new()
    }
}

// ── Fake ──────────────────────────────────────────────────────────────────────

/// A fake hardware type, useful for development and testing.
#[derive(Debug, Default)]
pub struct Fake;

impl HardwareType for Fake {
    fn name(&self) -> &'static str {
        "fake-hardware"
    }

    fn enabled_workers(&self) -> &'static [&'static str] {
        &["fake-worker"]
    }

    fn default_fields(&self) -> Vec<WorkerField> {
        vec![
            WorkerField::new("default_field"),
            WorkerField::new("default_required_field").required(),
        ]
    }
}

// ── Baremetal ─────────────────────────────────────────────────────────────────

/// A bare metal node, provisionable through the provisioning controller.
#[derive(Debug, Default)]
pub struct Baremetal;

impl HardwareType for Baremetal {
    fn name(&self) -> &'static str {
        "baremetal"
    }

    fn enabled_workers(&self) -> &'static [&'static str] {
        &["provisioner", "reservation"]
    }

    fn default_fields(&self) -> Vec<WorkerField> {
        vec![
            WorkerField::new("management_address")
                .schema(args::host_or_ip())
                .required()
                .private()
                .description("The out-of-band address, e.g. IPMI."),
            WorkerField::new("cpu_arch")
                .schema(args::cpu_arch())
                .required()
                .default_value(json!("x86_64"))
                .description("The CPU architecture."),
        ]
    }

    fn worker_overrides(&self) -> StateDetails {
        let mut overrides = StateDetails::new();
        overrides.insert("resource_class".to_string(), json!("baremetal"));
        overrides
    }
}

// ── Edge device ───────────────────────────────────────────────────────────────

pub const SUPPORTED_MACHINE_NAMES: &[&str] =
    &["jetson-nano", "raspberrypi3-64", "raspberrypi4-64"];

const SUPPORTED_CHANNEL_TYPES: &[&str] = &["wireguard"];

fn channels_schema() -> serde_json::Value {
    let channel = json!({
        "type": "object",
        "properties": {
            "channel_type": args::enum_of(SUPPORTED_CHANNEL_TYPES),
            "public_key": args::string(),
        },
        "required": ["channel_type"],
        "additionalProperties": false,
    });
    json!({
        "type": "object",
        "properties": {
            "user": channel,
            "mgmt": channel,
        },
        "required": ["user"],
        "additionalProperties": false,
    })
}

/// A small edge device reachable only through its overlay channels.
#[derive(Debug, Default)]
pub struct EdgeDevice;

impl HardwareType for EdgeDevice {
    fn name(&self) -> &'static str {
        "edge-device"
    }

    fn enabled_workers(&self) -> &'static [&'static str] {
        &["reservation", "tunnel"]
    }

    fn default_fields(&self) -> Vec<WorkerField> {
        vec![
            WorkerField::new("machine_name")
                .schema(args::enum_of(SUPPORTED_MACHINE_NAMES))
                .required()
                .description("The device model; must be an explicitly supported machine."),
            WorkerField::new("contact_email")
                .schema(args::email())
                .required()
                .private()
                .description(
                    "A contact email for any communication about the device. \
                     Enrollment credentials may be sent here, so ensure it is \
                     an active mailbox.",
                ),
            WorkerField::new("channels")
                .schema(channels_schema())
                .private()
                .description(
                    "Communication channels this device will use. All devices \
                     should at minimum provide a 'user' channel, through which \
                     user workload traffic passes.",
                ),
        ]
    }
}

// ── Worker node ───────────────────────────────────────────────────────────────

/// A node that joins the container orchestrator's cluster.
#[derive(Debug, Default)]
pub struct WorkerNode;

impl HardwareType for WorkerNode {
    fn name(&self) -> &'static str {
        "worker-node"
    }

    fn enabled_workers(&self) -> &'static [&'static str] {
        &["orchestrator"]
    }

    fn default_fields(&self) -> Vec<WorkerField> {
        vec![WorkerField::new("machine_name")
            .required()
            .description("Machine class used to select the expected node labels.")]
    }
}
