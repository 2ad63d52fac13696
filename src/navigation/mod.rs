//! 导航：路线、路点推进与锚点绑定

pub mod binder;
pub mod route;

pub use binder::{spawn_listener, BindReport, WaypointBinder};
pub use route::{default_routes, load_routes, Route, RouteProgress, RouteTracker, Waypoint};
