//! Local API surface
//!
//! HTTP/1 endpoints for health, readiness, metrics and HA administration.
//! The liveness launcher polls the readiness endpoint before starting a
//! session.
//!
//! | Method | Path                    | Purpose                          |
//! |--------|-------------------------|----------------------------------|
//! | GET    | `/config/params`        | readiness, node parameters       |
//! | GET    | `/health`, `/healthz`   | liveness                         |
//! | GET    | `/metrics`              | prometheus text format           |
//! | GET    | `/ha/state`             | all instance states              |
//! | GET    | `/ha/state/<instance>`  | one instance state               |
//! | GET    | `/ha/vip/<instance>`    | bound VIP of an instance         |
//! | POST   | `/ha/state`             | `{instance, state, vip}` update  |
//! | GET    | `/cluster/node`         | registered cluster nodes         |
//! | POST   | `/cluster/node`         | `{addr}` add                     |
//! | DELETE | `/cluster/node/<addr>`  | delete                           |

mod server;

pub use server::{handle_request, ApiContext, ApiServer, MAX_BODY_SIZE};
