//! Hierarchical tiering planner.
//!
//! Devices of a server are ranked by speed. When a file is accessed, the planner tries to move it to the fastest
//! device which can hold it. If no faster device has enough available space, the planner tries to free space on a
//! faster device by evicting its least accessed files one tier down, which may in turn require evictions on the lower
//! tier, and so on. The result is a [`MigrationPlan`] whose steps are ordered so that every step frees the space
//! needed by the next one.

use rustc_hash::FxHashMap;

use dslab_dfs_storage::{DeviceId, DevicePool};

use crate::fs::{FileTree, ResidentFile};
use crate::topology::{NodeId, ServerNode};

/// Movement of a group of files between two devices of the same server.
#[derive(Clone, Debug, PartialEq)]
pub struct MigrationStep {
    /// Moved files.
    pub files: Vec<String>,
    /// Total size of moved files.
    pub size: u64,
    /// Device the files are located on.
    pub source: DeviceId,
    /// Device the files are moved to.
    pub target: DeviceId,
}

/// Ordered migration steps triggered by an access to a file.
#[derive(Clone, Debug, PartialEq)]
pub struct MigrationPlan {
    /// Server the plan is made for.
    pub server: NodeId,
    /// Accessed file.
    pub path: String,
    /// Steps in execution order, the last one moves the accessed file.
    pub steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    /// Device the accessed file ends up on.
    pub fn destination(&self) -> Option<DeviceId> {
        self.steps.last().map(|s| s.target)
    }
}

/// Returns server devices ordered by ascending speed, devices with equal speed are ordered by id.
pub fn ordered_tiers(devices: &[DeviceId], pool: &DevicePool) -> Vec<DeviceId> {
    let mut tiers: Vec<(f64, DeviceId)> = devices
        .iter()
        .filter_map(|&id| pool.device(id).map(|d| (d.max_speed(), id)))
        .collect();
    tiers.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    tiers.into_iter().map(|(_, id)| id).collect()
}

/// Selects files to evict from a device to free at least `need` bytes.
///
/// Candidates are resident non-migrating files except `excluded`, taken in the order of ascending access count,
/// larger files first among equally accessed ones, so that the subset is small and consists of the coldest files.
/// Returns `None` if all candidates together do not free enough space.
pub fn select_victims(residents: Vec<ResidentFile>, need: u64, excluded: &str) -> Option<(Vec<String>, u64)> {
    let mut candidates: Vec<ResidentFile> = residents
        .into_iter()
        .filter(|f| !f.migrating && f.path != excluded)
        .collect();
    candidates.sort_by(|a, b| {
        a.access_count
            .cmp(&b.access_count)
            .then(b.size.cmp(&a.size))
            .then(a.path.cmp(&b.path))
    });
    let mut freed = 0;
    let mut victims = Vec::new();
    for file in candidates {
        if freed >= need {
            break;
        }
        freed += file.size;
        victims.push(file.path);
    }
    if freed >= need {
        Some((victims, freed))
    } else {
        None
    }
}

struct Planner<'a> {
    fs: &'a FileTree,
    pool: &'a DevicePool,
    tiers: Vec<DeviceId>,
    path: &'a str,
    // space released by files which leave a device within the plan
    credit: FxHashMap<DeviceId, u64>,
}

impl<'a> Planner<'a> {
    fn available(&self, device: DeviceId) -> u64 {
        let available = self.pool.device(device).map_or(0, |d| d.available_space());
        available + self.credit.get(&device).copied().unwrap_or(0)
    }

    fn evict(&self, pos: usize, need: u64) -> Option<Vec<MigrationStep>> {
        if pos == 0 {
            return None;
        }
        let source = self.tiers[pos];
        let target = self.tiers[pos - 1];
        let (files, size) = select_victims(self.fs.files_on(source), need, self.path)?;
        let step = MigrationStep {
            files,
            size,
            source,
            target,
        };
        let available = self.available(target);
        if available >= size {
            return Some(vec![step]);
        }
        let mut steps = self.evict(pos - 1, size - available)?;
        steps.push(step);
        Some(steps)
    }
}

/// Builds migration plan for an access to the file at `path` on the server.
///
/// Returns `None` if the file is already on the fastest device it can get to, is being migrated or cannot be moved.
pub fn plan_access(server_id: NodeId, server: &ServerNode, pool: &DevicePool, path: &str) -> Option<MigrationPlan> {
    let file = server.fs.file(path)?;
    if file.migrating {
        return None;
    }
    let size = file.size;
    let current = server.fs.resolve_mount(path)?;
    let tiers = ordered_tiers(&server.devices, pool);
    let current_pos = tiers.iter().position(|&d| d == current)?;

    let mut planner = Planner {
        fs: &server.fs,
        pool,
        tiers,
        path,
        credit: FxHashMap::default(),
    };
    planner.credit.insert(current, size);
    let plan = |steps: Vec<MigrationStep>| MigrationPlan {
        server: server_id,
        path: path.to_string(),
        steps,
    };
    let moved = |target: DeviceId| MigrationStep {
        files: vec![path.to_string()],
        size,
        source: current,
        target,
    };

    let faster = (current_pos + 1..planner.tiers.len()).rev();
    for pos in faster.clone() {
        let device = planner.tiers[pos];
        if planner.available(device) >= size {
            return Some(plan(vec![moved(device)]));
        }
    }
    for pos in faster {
        let device = planner.tiers[pos];
        let need = size - planner.available(device);
        if let Some(mut steps) = planner.evict(pos, need) {
            steps.push(moved(device));
            return Some(plan(steps));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use dslab_dfs_storage::{DeviceSpec, DevicePool};

    use super::{ordered_tiers, plan_access, select_victims, MigrationStep};
    use crate::fs::ResidentFile;
    use crate::topology::ServerNode;

    fn resident(path: &str, size: u64, access_count: u64) -> ResidentFile {
        ResidentFile {
            path: path.to_string(),
            size,
            access_count,
            migrating: false,
        }
    }

    #[test]
    fn coldest_files_are_evicted_first() {
        let residents = vec![
            resident("/a", 10, 5),
            resident("/b", 10, 1),
            resident("/c", 30, 1),
            resident("/d", 50, 0),
        ];
        assert_eq!(select_victims(residents.clone(), 40, "/x"), Some((vec!["/d".to_string()], 50)));
        assert_eq!(select_victims(residents.clone(), 60, "/d"), None);
        assert_eq!(
            select_victims(residents.clone(), 40, "/d"),
            Some((vec!["/c".to_string(), "/b".to_string()], 40))
        );
        assert_eq!(select_victims(residents, 101, ""), None);
    }

    fn three_tier_server(pool: &mut DevicePool) -> ServerNode {
        let mut server = ServerNode::default();
        // created out of speed order on purpose
        let ssd = pool.add_device(DeviceSpec::new("ssd", 100, 500.));
        let hdd = pool.add_device(DeviceSpec::new("hdd", 100, 100.));
        let nvme = pool.add_device(DeviceSpec::new("nvme", 100, 2000.));
        server.devices = vec![ssd, hdd, nvme];
        server.fs.mount("/", hdd).unwrap();
        server.hierarchical = true;
        server
    }

    #[test]
    fn tiers_are_ordered_by_speed() {
        let mut pool = DevicePool::new();
        let server = three_tier_server(&mut pool);
        assert_eq!(ordered_tiers(&server.devices, &pool), vec![1, 0, 2]);
    }

    #[test]
    fn file_goes_to_fastest_device_with_space() {
        let mut pool = DevicePool::new();
        let mut server = three_tier_server(&mut pool);
        server.fs.create_file("/f", 60).unwrap();
        pool.device_mut(1).unwrap().allocate_space(60).unwrap();
        pool.device_mut(2).unwrap().allocate_space(50).unwrap();

        let plan = plan_access(7, &server, &pool, "/f").unwrap();
        assert_eq!(plan.server, 7);
        assert_eq!(
            plan.steps,
            vec![MigrationStep {
                files: vec!["/f".to_string()],
                size: 60,
                source: 1,
                target: 0,
            }]
        );
    }

    #[test]
    fn file_on_fastest_device_stays() {
        let mut pool = DevicePool::new();
        let mut server = three_tier_server(&mut pool);
        server.fs.mount("/hot", 2).unwrap();
        server.fs.create_file("/hot/f", 10).unwrap();
        assert!(plan_access(0, &server, &pool, "/hot/f").is_none());
        server.fs.create_file("/g", 10).unwrap();
        server.fs.set_migrating("/g", true).unwrap();
        assert!(plan_access(0, &server, &pool, "/g").is_none());
    }
}
