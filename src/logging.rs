use chrono::Local;
use env_logger::{Builder, Env};
use log::{debug, info, warn};
use std::io::Write;
use std::sync::Once;

use crate::membership::{MembershipView, PeerId, Status, StatusKind};

static INIT: Once = Once::new();

/// Initialize the logging system
///
/// `RUST_LOG` takes precedence over `default_filter`. Calling this more than
/// once is harmless.
pub fn init_logging(default_filter: &str) {
    INIT.call_once(|| {
        let mut builder = Builder::from_env(Env::default().default_filter_or(default_filter));
        builder.format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}: {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        });
        // Tests may have installed a logger already
        let _ = builder.try_init();
    });
}

/// Log a member changing state in our view
pub fn log_status_change(local: &PeerId, previous: Option<StatusKind>, current: &Status) {
    match (previous, current.kind) {
        (_, StatusKind::Dead) => warn!(
            "{}: member {} declared DEAD (incarnation {})",
            local, current.owner, current.incarnation
        ),
        (None, kind) => info!(
            "{}: discovered member {} as {} (incarnation {})",
            local, current.owner, kind, current.incarnation
        ),
        (Some(from), to) if from != to => info!(
            "{}: member {} {} -> {} (incarnation {})",
            local, current.owner, from, to, current.incarnation
        ),
        (Some(_), _) => debug!(
            "{}: member {} now at incarnation {}",
            local, current.owner, current.incarnation
        ),
    }
}

/// Dump the whole view, one member per line
pub fn log_view(view: &MembershipView) {
    let alive = view
        .iter()
        .filter(|(_, status)| status.kind == StatusKind::Alive)
        .count();
    info!(
        "{}: view has {} members ({} alive), incarnation {}",
        view.local_id(),
        view.len(),
        alive,
        view.incarnation()
    );
    for (peer, status) in view.iter() {
        info!(
            "  - {} {} inc={} reporter={}",
            peer, status.kind, status.incarnation, status.reporter
        );
    }
}
