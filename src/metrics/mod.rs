//! Radio metrics derived from the propagation model across all APs.

use crate::geo::Point2;
use crate::physics::gain::angle_dependent_gain;
use crate::physics::path_loss::{Obstructions, path_loss, rssi};
use crate::scene::SceneSnapshot;

/// RSSI reported when no AP is enabled.
pub const NO_SERVER_RSSI_DBM: f64 = -1e9;
/// CCI reported when the serving channel has no other enabled AP.
pub const NO_INTERFERENCE_DBM: f64 = -200.0;
/// Same-channel APs above this level count as interferers.
pub const INTERFERER_THRESHOLD_DBM: f64 = -85.0;
/// CCI below this is treated as no interference in SINR.
pub const NEGLIGIBLE_INTERFERENCE_DBM: f64 = -150.0;

const LINEAR_EPSILON: f64 = 1e-12;

/// (SINR threshold dB, PHY rate Mbps), ascending.
pub const THROUGHPUT_TABLE: [(f64, f64); 7] = [
    (-5.0, 0.0),
    (0.0, 6.5),
    (5.0, 13.0),
    (10.0, 26.0),
    (15.0, 39.0),
    (20.0, 58.5),
    (25.0, 72.2),
];

pub fn dbm_to_lin(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0)
}

pub fn lin_to_dbm(lin: f64) -> f64 {
    10.0 * lin.max(LINEAR_EPSILON).log10()
}

pub fn snr(rssi_dbm: f64, noise_floor_dbm: f64) -> f64 {
    rssi_dbm - noise_floor_dbm
}

pub fn sinr(rssi_dbm: f64, cci_dbm: f64, noise_floor_dbm: f64) -> f64 {
    let signal = dbm_to_lin(rssi_dbm);
    let interference = if cci_dbm < NEGLIGIBLE_INTERFERENCE_DBM {
        0.0
    } else {
        dbm_to_lin(cci_dbm)
    };
    let denominator = (interference + dbm_to_lin(noise_floor_dbm)).max(LINEAR_EPSILON);
    10.0 * (signal / denominator).max(LINEAR_EPSILON).log10()
}

/// Rate of the highest threshold not above `sinr_db`.
pub fn throughput(sinr_db: f64) -> f64 {
    THROUGHPUT_TABLE
        .iter()
        .take_while(|(threshold, _)| *threshold <= sinr_db)
        .last()
        .map(|(_, rate)| *rate)
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestServer {
    /// Index into the snapshot's AP list
    pub ap: Option<usize>,
    pub rssi_dbm: f64,
}

impl BestServer {
    pub const NONE: BestServer = BestServer {
        ap: None,
        rssi_dbm: NO_SERVER_RSSI_DBM,
    };
}

/// Every metric at one point, as used by the detailed export.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointMetrics {
    pub server: BestServer,
    pub snr_db: f64,
    pub cci_dbm: f64,
    pub sinr_db: f64,
    pub throughput_mbps: f64,
    pub interferers: usize,
}

/// Metric queries against one immutable scene snapshot.
#[derive(Clone, Copy)]
pub struct RadioMetrics<'a> {
    scene: &'a SceneSnapshot,
}

impl<'a> RadioMetrics<'a> {
    pub fn new(scene: &'a SceneSnapshot) -> Self {
        Self { scene }
    }

    fn obstructions(&self) -> Obstructions<'a> {
        Obstructions {
            walls: &self.scene.walls,
            floor_planes: &self.scene.floor_planes,
            ground: &self.scene.ground,
        }
    }

    /// RSSI of AP `index` at `p`, ignoring its enabled flag.
    pub fn rssi_from(&self, index: usize, p: Point2) -> f64 {
        let Some(resolved) = self.scene.aps.get(index) else {
            return NO_SERVER_RSSI_DBM;
        };
        let params = &self.scene.params;
        let ap = &resolved.ap;
        let gain = angle_dependent_gain(ap, p, resolved.pattern.as_deref(), params);
        let loss = path_loss(ap.position(), p, &self.obstructions(), params);
        rssi(ap.tx_dbm, gain, loss, params.reference_offset_db)
    }

    /// Strongest enabled AP. Ties go to the earliest AP in the list.
    pub fn best_server(&self, p: Point2) -> BestServer {
        let mut best = BestServer::NONE;
        for (i, resolved) in self.scene.aps.iter().enumerate() {
            if !resolved.ap.enabled {
                continue;
            }
            let level = self.rssi_from(i, p);
            if level > best.rssi_dbm {
                best = BestServer {
                    ap: Some(i),
                    rssi_dbm: level,
                };
            }
        }
        best
    }

    /// Best server, unless the scene focuses an enabled AP.
    pub fn serving(&self, p: Point2) -> BestServer {
        match self.scene.focus {
            Some(i) if self.scene.aps.get(i).is_some_and(|r| r.ap.enabled) => BestServer {
                ap: Some(i),
                rssi_dbm: self.rssi_from(i, p),
            },
            _ => self.best_server(p),
        }
    }

    fn co_channel(&self, serving: usize) -> impl Iterator<Item = usize> + '_ {
        let channel = self.scene.aps.get(serving).map(|r| r.ap.channel);
        self.scene
            .aps
            .iter()
            .enumerate()
            .filter(move |(i, r)| *i != serving && r.ap.enabled && Some(r.ap.channel) == channel)
            .map(|(i, _)| i)
    }

    /// Co-channel interference at `p` from every other enabled AP on the serving channel.
    pub fn cci(&self, p: Point2, serving: usize) -> f64 {
        let sum: f64 = self
            .co_channel(serving)
            .map(|i| dbm_to_lin(self.rssi_from(i, p)))
            .sum();
        if sum <= 0.0 {
            NO_INTERFERENCE_DBM
        } else {
            lin_to_dbm(sum)
        }
    }

    pub fn interfering_count(&self, p: Point2, serving: usize) -> usize {
        self.co_channel(serving)
            .filter(|i| self.rssi_from(*i, p) > INTERFERER_THRESHOLD_DBM)
            .count()
    }

    pub fn point_metrics(&self, p: Point2) -> PointMetrics {
        let noise = self.scene.params.noise_floor_dbm;
        let server = self.serving(p);
        let (cci_dbm, interferers) = match server.ap {
            Some(i) => (self.cci(p, i), self.interfering_count(p, i)),
            None => (NO_INTERFERENCE_DBM, 0),
        };
        let sinr_db = sinr(server.rssi_dbm, cci_dbm, noise);
        PointMetrics {
            server,
            snr_db: snr(server.rssi_dbm, noise),
            cci_dbm,
            sinr_db,
            throughput_mbps: throughput(sinr_db),
            interferers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{AccessPoint, GroundPlaneConfig};
    use crate::scene::SceneState;

    fn two_ap_scene(second_channel: u32) -> SceneState {
        let mut scene = SceneState::new(40.0, 20.0).unwrap();
        scene.set_ground_plane(GroundPlaneConfig { enabled: false, attenuation_db: 3.0 });
        scene.add_ap(AccessPoint::new("A", 5.0, 10.0, 20.0, 1)).unwrap();
        scene.add_ap(AccessPoint::new("B", 35.0, 10.0, 20.0, second_channel)).unwrap();
        scene
    }

    #[test]
    fn throughput_steps() {
        assert_eq!(throughput(-10.0), 0.0);
        assert_eq!(throughput(-5.0), 0.0);
        assert_eq!(throughput(0.0), 6.5);
        assert_eq!(throughput(12.0), 26.0);
        assert_eq!(throughput(25.0), 72.2);
        assert_eq!(throughput(100.0), 72.2);
    }

    #[test]
    fn sinr_without_interference_equals_snr() {
        let value = sinr(-60.0, NO_INTERFERENCE_DBM, -92.0);
        assert!((value - 32.0).abs() < 1e-9);
    }

    #[test]
    fn negligible_interference_cutoff() {
        let clean = sinr(-60.0, NO_INTERFERENCE_DBM, -92.0);
        assert!(sinr(-60.0, -149.0, -92.0) < clean);
        assert_eq!(sinr(-60.0, -151.0, -92.0), clean);
    }

    #[test]
    fn interference_dominates_noise() {
        // 1e-7 mW of interference against ~6.3e-10 mW of noise
        let value = sinr(-60.0, -70.0, -92.0);
        let expected = 10.0 * (1e-6 / (1e-7 + 10f64.powf(-9.2))).log10();
        assert!((value - expected).abs() < 1e-9);
        assert!(value < 10.0 && value > 9.9);
    }

    #[test]
    fn sinr_stays_finite_without_signal() {
        let value = sinr(NO_SERVER_RSSI_DBM, NO_INTERFERENCE_DBM, -92.0);
        assert!(value.is_finite());
        assert!((value - -120.0).abs() < 1e-9);
    }

    #[test]
    fn lin_to_dbm_floors_zero() {
        assert!((lin_to_dbm(0.0) - -120.0).abs() < 1e-9);
    }

    #[test]
    fn best_server_picks_nearest_and_skips_disabled() {
        let mut scene = two_ap_scene(1);
        let snap = scene.snapshot();
        let radio = RadioMetrics::new(&snap);
        assert_eq!(radio.best_server(Point2::new(8.0, 10.0)).ap, Some(0));
        assert_eq!(radio.best_server(Point2::new(32.0, 10.0)).ap, Some(1));

        scene.set_ap_enabled("B", false).unwrap();
        let snap = scene.snapshot();
        assert_eq!(RadioMetrics::new(&snap).best_server(Point2::new(32.0, 10.0)).ap, Some(0));
    }

    #[test]
    fn ties_go_to_first_ap() {
        let mut scene = SceneState::new(20.0, 20.0).unwrap();
        scene.add_ap(AccessPoint::new("A", 5.0, 10.0, 20.0, 1)).unwrap();
        scene.add_ap(AccessPoint::new("B", 15.0, 10.0, 20.0, 6)).unwrap();
        let snap = scene.snapshot();
        assert_eq!(RadioMetrics::new(&snap).best_server(Point2::new(10.0, 10.0)).ap, Some(0));
    }

    #[test]
    fn no_enabled_ap_yields_sentinel() {
        let mut scene = two_ap_scene(1);
        scene.set_ap_enabled("A", false).unwrap();
        scene.set_ap_enabled("B", false).unwrap();
        let snap = scene.snapshot();
        let m = RadioMetrics::new(&snap).point_metrics(Point2::new(1.0, 1.0));
        assert_eq!(m.server, BestServer::NONE);
        assert_eq!(m.cci_dbm, NO_INTERFERENCE_DBM);
        assert_eq!(m.interferers, 0);
        assert!(m.sinr_db.is_finite());
        assert!(m.snr_db.is_finite());
        assert_eq!(m.throughput_mbps, 0.0);
    }

    #[test]
    fn co_channel_ap_interferes() {
        let snap = two_ap_scene(1).snapshot();
        let radio = RadioMetrics::new(&snap);
        let p = Point2::new(10.0, 10.0);
        let cci = radio.cci(p, 0);
        assert!((cci - radio.rssi_from(1, p)).abs() < 1e-9);
        assert_eq!(radio.interfering_count(p, 0), 1);

        let snap = two_ap_scene(11).snapshot();
        let radio = RadioMetrics::new(&snap);
        assert_eq!(radio.cci(p, 0), NO_INTERFERENCE_DBM);
        assert_eq!(radio.interfering_count(p, 0), 0);
    }

    #[test]
    fn focus_overrides_best_server() {
        let mut scene = two_ap_scene(1);
        scene.set_focus(Some("B")).unwrap();
        let snap = scene.snapshot();
        let radio = RadioMetrics::new(&snap);
        let p = Point2::new(6.0, 10.0);
        assert_eq!(radio.serving(p).ap, Some(1));
        assert_eq!(radio.best_server(p).ap, Some(0));
    }
}
