//! 路线与路点：静态勘测坐标 + 可选的实时锚点变换
//!
//! 路点位置优先取绑定的锚点变换，未绑定（或变换暂不可用）时回退到勘测坐标，导航永远有位置可用。

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::anchor::{TransformRef, Vec3};
use crate::core::AnchorError;
use crate::store::RouteId;

/// 路线上的一个点
#[derive(Debug, Clone)]
pub struct Waypoint {
    pub waypoint_id: String,
    pub fallback_position: Vec3,
    /// 到达判定半径（米，水平面）
    pub radius: f32,
    pub location_name: String,
    /// 锚点子系统中的实时变换（非拥有）
    pub bound_transform: Option<TransformRef>,
}

impl Waypoint {
    pub fn new(
        waypoint_id: impl Into<String>,
        fallback_position: Vec3,
        radius: f32,
        location_name: impl Into<String>,
    ) -> Self {
        Self {
            waypoint_id: waypoint_id.into(),
            fallback_position,
            radius,
            location_name: location_name.into(),
            bound_transform: None,
        }
    }

    /// 绑定变换的当前位置，否则为勘测坐标
    pub fn effective_position(&self) -> Vec3 {
        self.bound_transform
            .as_ref()
            .and_then(TransformRef::position)
            .unwrap_or(self.fallback_position)
    }

    /// 未绑定、或绑定的变换已不可用（来源释放）时为 true，与 effective_position 一致
    pub fn is_using_fallback(&self) -> bool {
        self.bound_transform
            .as_ref()
            .and_then(TransformRef::position)
            .is_none()
    }
}

/// 一条有序路线
#[derive(Debug, Clone)]
pub struct Route {
    pub route_id: RouteId,
    pub waypoints: Vec<Waypoint>,
}

impl Route {
    pub fn new(route_id: RouteId, waypoints: Vec<Waypoint>) -> Self {
        Self {
            route_id,
            waypoints,
        }
    }

    pub fn get(&self, waypoint_id: &str) -> Option<&Waypoint> {
        self.waypoints.iter().find(|w| w.waypoint_id == waypoint_id)
    }

    pub fn get_mut(&mut self, waypoint_id: &str) -> Option<&mut Waypoint> {
        self.waypoints
            .iter_mut()
            .find(|w| w.waypoint_id == waypoint_id)
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }
}

fn wp(id: &str, x: f32, z: f32, radius: f32, name: &str) -> Waypoint {
    Waypoint::new(id, Vec3::new(x, 0.0, z), radius, name)
}

/// 内置 A / B 路线（平面图估计坐标，现场勘测后可用路线文件覆盖）
pub fn default_routes() -> HashMap<RouteId, Route> {
    let route_a = Route::new(
        RouteId::A,
        vec![
            wp("WP01", -7.0, 0.0, 2.5, "B123 lecture room (south corridor)"),
            wp("WP02", -20.0, 4.0, 2.5, "B125 lecture hall (west)"),
            wp("WP03", -20.0, 0.0, 3.0, "SW junction"),
            wp("WP04", -20.0, 11.0, 2.5, "B129 graduate room (west corridor)"),
            wp("WP05", -20.0, 14.0, 2.5, "B130 graduate room (west corridor)"),
            wp("WP06", -20.0, 25.0, 3.0, "NW junction"),
            wp("WP07", -11.0, 25.0, 2.5, "B132 lecture room (north corridor)"),
            wp("WP08", -3.0, 25.0, 2.5, "B133 seminar room (north corridor)"),
        ],
    );
    let route_b = Route::new(
        RouteId::B,
        vec![
            wp("WP01", 7.0, 0.0, 2.5, "B121 PC lab (south corridor)"),
            wp("WP02", 20.0, 4.0, 2.5, "B116 (east corridor, south end)"),
            wp("WP03", 20.0, 8.0, 3.0, "E-T junction"),
            wp("WP04", 20.0, 11.0, 2.5, "B110 (east corridor)"),
            wp("WP05", 20.0, 15.0, 2.5, "B107 research lab (east corridor)"),
            wp("WP06", 20.0, 25.0, 3.0, "NE junction"),
            wp("WP07", 20.0, 23.0, 2.5, "B104 office (east corridor, north end)"),
            wp("WP08", 20.0, 22.0, 2.5, "B105 office (east corridor, north end)"),
        ],
    );
    HashMap::from([(RouteId::A, route_a), (RouteId::B, route_b)])
}

#[derive(Debug, Deserialize)]
struct RoutesFileDto {
    routes: Vec<RouteDto>,
}

#[derive(Debug, Deserialize)]
struct RouteDto {
    route_id: String,
    #[serde(default)]
    waypoints: Vec<WaypointDto>,
}

#[derive(Debug, Deserialize)]
struct WaypointDto {
    waypoint_id: String,
    position: [f32; 3],
    #[serde(default)]
    radius: Option<f32>,
    #[serde(default)]
    location_name: String,
}

/// 解析路线 JSON；文件中未出现的路线保留内置坐标，缺失或非法半径取 default_radius
pub fn parse_routes(
    json: &str,
    default_radius: f32,
) -> Result<HashMap<RouteId, Route>, AnchorError> {
    let dto: RoutesFileDto = serde_json::from_str(json)?;
    let mut routes = default_routes();
    for r in dto.routes {
        let route_id: RouteId = r.route_id.parse()?;
        let waypoints = r
            .waypoints
            .into_iter()
            .map(|w| {
                let radius = match w.radius {
                    Some(r) if r > 0.0 => r,
                    _ => default_radius,
                };
                let [x, y, z] = w.position;
                Waypoint::new(w.waypoint_id, Vec3::new(x, y, z), radius, w.location_name)
            })
            .collect();
        routes.insert(route_id, Route::new(route_id, waypoints));
    }
    Ok(routes)
}

/// 读取路线文件；未配置时返回内置路线
pub async fn load_routes(
    path: Option<&Path>,
    default_radius: f32,
) -> Result<HashMap<RouteId, Route>, AnchorError> {
    match path {
        Some(path) => {
            let json = tokio::fs::read_to_string(path).await?;
            let routes = parse_routes(&json, default_radius)?;
            tracing::info!(path = %path.display(), "Routes loaded from file");
            Ok(routes)
        }
        None => Ok(default_routes()),
    }
}

/// 路线推进进度
#[derive(Debug, Clone, PartialEq)]
pub enum RouteProgress {
    Reached { waypoint_id: String, index: usize },
    /// 到达最后一个路点
    Completed { waypoint_id: String },
}

/// 沿路线推进：水平距离进入路点半径即视为到达
#[derive(Debug, Default)]
pub struct RouteTracker {
    current_index: usize,
}

fn horizontal_distance(a: &Vec3, b: &Vec3) -> f32 {
    (a.xz() - b.xz()).norm()
}

impl RouteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn reset(&mut self) {
        self.current_index = 0;
    }

    pub fn is_complete(&self, route: &Route) -> bool {
        self.current_index >= route.len()
    }

    pub fn current<'a>(&self, route: &'a Route) -> Option<&'a Waypoint> {
        route.waypoints.get(self.current_index)
    }

    /// 根据参与者当前位置推进一步（每次最多到达一个路点）
    pub fn update(&mut self, route: &Route, participant: &Vec3) -> Option<RouteProgress> {
        let wp = self.current(route)?;
        if horizontal_distance(participant, &wp.effective_position()) > wp.radius {
            return None;
        }
        let waypoint_id = wp.waypoint_id.clone();
        tracing::info!(waypoint_id = %waypoint_id, location = %wp.location_name, "Waypoint reached");
        let index = self.current_index;
        self.current_index += 1;
        if self.is_complete(route) {
            tracing::info!(route_id = %route.route_id, "Route complete");
            Some(RouteProgress::Completed { waypoint_id })
        } else {
            Some(RouteProgress::Reached { waypoint_id, index })
        }
    }

    /// 指向当前目标路点的单位向量；无目标或重合时为前方 (0, 0, 1)
    pub fn direction_to_next(&self, route: &Route, participant: &Vec3) -> Vec3 {
        let forward = Vec3::new(0.0, 0.0, 1.0);
        let Some(wp) = self.current(route) else {
            return forward;
        };
        (wp.effective_position() - participant)
            .try_normalize(1e-6)
            .unwrap_or(forward)
    }

    /// 到当前目标路点的直线距离；路线完成后为 0
    pub fn distance_to_next(&self, route: &Route, participant: &Vec3) -> f32 {
        self.current(route)
            .map_or(0.0, |wp| (wp.effective_position() - participant).norm())
    }
}
