//! Observable events of the replicated write path
//!
//! Events are explicit and typed. Each carries its default severity so
//! call sites only choose the fields.

use std::fmt;

use super::logger::Severity;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Node joined the local network
    NodeStart,
    /// Configuration loaded and validated
    ConfigLoaded,

    // Topology
    /// A newer topology was installed
    TopologyInstalled,
    /// An install offered a topology that is not newer
    TopologyRejected,

    // Originator
    /// Write dispatched under a topology
    WriteDispatch,
    /// Write completed on the originator
    WriteComplete,
    /// Best-effort write failed and the failure was swallowed
    ExternalReadSwallowed,
    /// Topology-retry signal observed, waiting to re-dispatch
    RetryScheduled,
    /// Topology did not converge in time, retry abandoned
    RetryAbandoned,

    // Primary
    /// Primary applied a write
    PrimaryApplied,
    /// Conditional write did not match, backups skipped
    PrimaryConditionFailed,
    /// Primary failed executing a write
    PrimaryFault,
    /// Primary is behind the command's topology and waits
    PrimaryAwaitTopology,
    /// Receiver's topology is ahead of the command's, replied unsure
    CommandUnsure,
    /// Write forwarded to a backup
    BackupForward,
    /// Forward to a backup could not be sent
    BackupForwardFailed,

    // Backup
    /// Backup applied a forwarded write
    BackupApplied,
    /// Backup failed applying a forwarded write
    BackupFault,

    // Collector
    /// Collector registered
    CollectorCreated,
    /// Collector already registered for this id, first writer kept
    CollectorDuplicate,
    /// Collector completed with a value
    CollectorComplete,
    /// Collector completed with an error
    CollectorFailed,
    /// Acknowledgment tagged with another topology, dropped
    AckStale,
    /// Acknowledgment for an unknown or finished operation, dropped
    AckOrphaned,
    /// Acknowledgment could not be sent to the originator
    AckSendFailed,
    /// Departed backup's acknowledgment waived
    BackupWaived,
    /// Primary departed with acknowledgments outstanding
    PrimaryDeparted,
    /// No completion within the timeout
    AckTimeout,

    // Network
    /// Message dropped by the network (crashed node or cut link)
    MessageDropped,
    /// Message could not be decoded
    MessageDecodeFailed,

    // Simulation
    /// Simulation run begins
    SimulationStart,
    /// Node crashed by the simulation
    SimulationCrash,
    /// Simulation run complete
    SimulationComplete,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::NodeStart => "NODE_START",
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::TopologyInstalled => "TOPOLOGY_INSTALLED",
            Event::TopologyRejected => "TOPOLOGY_REJECTED",

            Event::WriteDispatch => "WRITE_DISPATCH",
            Event::WriteComplete => "WRITE_COMPLETE",
            Event::ExternalReadSwallowed => "EXTERNAL_READ_SWALLOWED",
            Event::RetryScheduled => "RETRY_SCHEDULED",
            Event::RetryAbandoned => "RETRY_ABANDONED",

            Event::PrimaryApplied => "PRIMARY_APPLIED",
            Event::PrimaryConditionFailed => "PRIMARY_CONDITION_FAILED",
            Event::PrimaryFault => "PRIMARY_FAULT",
            Event::PrimaryAwaitTopology => "PRIMARY_AWAIT_TOPOLOGY",
            Event::CommandUnsure => "COMMAND_UNSURE",
            Event::BackupForward => "BACKUP_FORWARD",
            Event::BackupForwardFailed => "BACKUP_FORWARD_FAILED",

            Event::BackupApplied => "BACKUP_APPLIED",
            Event::BackupFault => "BACKUP_FAULT",

            Event::CollectorCreated => "COLLECTOR_CREATED",
            Event::CollectorDuplicate => "COLLECTOR_DUPLICATE",
            Event::CollectorComplete => "COLLECTOR_COMPLETE",
            Event::CollectorFailed => "COLLECTOR_FAILED",
            Event::AckStale => "ACK_STALE",
            Event::AckOrphaned => "ACK_ORPHANED",
            Event::AckSendFailed => "ACK_SEND_FAILED",
            Event::BackupWaived => "BACKUP_WAIVED",
            Event::PrimaryDeparted => "PRIMARY_DEPARTED",
            Event::AckTimeout => "ACK_TIMEOUT",

            Event::MessageDropped => "MESSAGE_DROPPED",
            Event::MessageDecodeFailed => "MESSAGE_DECODE_FAILED",

            Event::SimulationStart => "SIMULATION_START",
            Event::SimulationCrash => "SIMULATION_CRASH",
            Event::SimulationComplete => "SIMULATION_COMPLETE",
        }
    }

    /// Default severity of the event
    pub fn severity(&self) -> Severity {
        match self {
            Event::NodeStart
            | Event::ConfigLoaded
            | Event::TopologyInstalled
            | Event::SimulationStart
            | Event::SimulationCrash
            | Event::SimulationComplete
            | Event::PrimaryDeparted
            | Event::BackupWaived
            | Event::RetryScheduled => Severity::Info,

            Event::TopologyRejected
            | Event::CollectorDuplicate
            | Event::CommandUnsure
            | Event::BackupForwardFailed
            | Event::AckSendFailed
            | Event::AckTimeout
            | Event::ExternalReadSwallowed
            | Event::MessageDecodeFailed => Severity::Warn,

            Event::PrimaryFault | Event::BackupFault | Event::RetryAbandoned => Severity::Error,

            _ => Severity::Trace,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_screaming_snake() {
        let events = [
            Event::NodeStart,
            Event::TopologyInstalled,
            Event::WriteDispatch,
            Event::PrimaryConditionFailed,
            Event::BackupForward,
            Event::BackupApplied,
            Event::CollectorComplete,
            Event::AckStale,
            Event::BackupWaived,
            Event::PrimaryDeparted,
            Event::AckTimeout,
            Event::RetryScheduled,
            Event::MessageDropped,
            Event::SimulationComplete,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_hot_path_events_are_trace() {
        assert_eq!(Event::WriteDispatch.severity(), Severity::Trace);
        assert_eq!(Event::BackupApplied.severity(), Severity::Trace);
        assert_eq!(Event::AckStale.severity(), Severity::Trace);
    }

    #[test]
    fn test_faults_are_errors() {
        assert_eq!(Event::PrimaryFault.severity(), Severity::Error);
        assert_eq!(Event::RetryAbandoned.severity(), Severity::Error);
        assert_eq!(Event::AckTimeout.severity(), Severity::Warn);
    }

    #[test]
    fn test_event_display() {
        assert_eq!(format!("{}", Event::BackupWaived), "BACKUP_WAIVED");
    }
}
