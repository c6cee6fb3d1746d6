//! Per-server file tree.
//!
//! Objects are kept in an arena and refer to their parent by index. Every object may be mounted on a storage device,
//! an object without its own mount is located on the device of its nearest mounted ancestor. Files track their size,
//! the number of accesses and whether they are being migrated between devices.
//!
//! Paths are absolute and `/`-separated, empty components are ignored, so `/a//b/` is the same as `/a/b`.

use indexmap::IndexMap;

use dslab_dfs_storage::DeviceId;

/// Index of an object in the tree arena.
pub type FsIndex = usize;

const ROOT: FsIndex = 0;

/// File attributes.
#[derive(Clone, Debug, PartialEq)]
pub struct FileEntry {
    /// File size in bytes.
    pub size: u64,
    /// Number of accesses.
    pub access_count: u64,
    /// Whether the file is being moved to another device.
    pub migrating: bool,
}

/// Object variants.
#[derive(Clone, Debug, PartialEq)]
pub enum FsKind {
    /// Directory with named children.
    Directory(IndexMap<String, FsIndex>),
    /// Regular file.
    File(FileEntry),
}

/// Object of the file tree.
#[derive(Clone, Debug)]
pub struct FsObject {
    name: String,
    parent: Option<FsIndex>,
    mount: Option<DeviceId>,
    kind: FsKind,
}

impl FsObject {
    /// Object name (last path component).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Device the object itself is mounted on.
    pub fn mount(&self) -> Option<DeviceId> {
        self.mount
    }

    /// Object variant.
    pub fn kind(&self) -> &FsKind {
        &self.kind
    }

    /// File attributes if the object is a file.
    pub fn as_file(&self) -> Option<&FileEntry> {
        match &self.kind {
            FsKind::File(file) => Some(file),
            FsKind::Directory(_) => None,
        }
    }
}

/// Summary of a file located on some device.
#[derive(Clone, Debug, PartialEq)]
pub struct ResidentFile {
    /// Full path.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Number of accesses.
    pub access_count: u64,
    /// Whether the file is being migrated.
    pub migrating: bool,
}

/// Errors of file tree manipulation, mapped to engine errors by the caller.
#[derive(Clone, Debug, PartialEq)]
pub enum FsError {
    /// Path does not exist.
    NotFound,
    /// Path already exists.
    Exists,
    /// A path component which must be a directory is a file.
    NotADirectory,
    /// Operation on the root directory.
    Root,
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

/// Normalizes path to the `/a/b` form.
pub fn normalize(path: &str) -> String {
    let mut result = String::new();
    for component in components(path) {
        result.push('/');
        result.push_str(component);
    }
    if result.is_empty() {
        result.push('/');
    }
    result
}

/// Tree of directories and files of a single server.
#[derive(Clone, Debug)]
pub struct FileTree {
    objects: Vec<Option<FsObject>>,
    free: Vec<FsIndex>,
}

impl Default for FileTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTree {
    /// Creates tree with an empty unmounted root directory.
    pub fn new() -> Self {
        Self {
            objects: vec![Some(FsObject {
                name: String::new(),
                parent: None,
                mount: None,
                kind: FsKind::Directory(IndexMap::new()),
            })],
            free: Vec::new(),
        }
    }

    fn object(&self, index: FsIndex) -> &FsObject {
        self.objects[index].as_ref().expect("dangling file tree index")
    }

    fn object_mut(&mut self, index: FsIndex) -> &mut FsObject {
        self.objects[index].as_mut().expect("dangling file tree index")
    }

    fn child(&self, dir: FsIndex, name: &str) -> Option<FsIndex> {
        match &self.object(dir).kind {
            FsKind::Directory(children) => children.get(name).copied(),
            FsKind::File(_) => None,
        }
    }

    fn alloc(&mut self, object: FsObject) -> FsIndex {
        match self.free.pop() {
            Some(index) => {
                self.objects[index] = Some(object);
                index
            }
            None => {
                self.objects.push(Some(object));
                self.objects.len() - 1
            }
        }
    }

    /// Returns index of the object at `path`.
    pub fn resolve(&self, path: &str) -> Option<FsIndex> {
        let mut current = ROOT;
        for component in components(path) {
            current = self.child(current, component)?;
        }
        Some(current)
    }

    /// Returns object at `path`.
    pub fn get(&self, path: &str) -> Option<&FsObject> {
        self.resolve(path).map(|index| self.object(index))
    }

    /// Returns file attributes at `path`.
    pub fn file(&self, path: &str) -> Option<&FileEntry> {
        self.get(path).and_then(|o| o.as_file())
    }

    fn file_mut(&mut self, path: &str) -> Option<&mut FileEntry> {
        let index = self.resolve(path)?;
        match &mut self.object_mut(index).kind {
            FsKind::File(file) => Some(file),
            FsKind::Directory(_) => None,
        }
    }

    /// Returns whether the path exists.
    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_some()
    }

    /// Returns full path of the object.
    pub fn path_of(&self, index: FsIndex) -> String {
        let mut names = Vec::new();
        let mut current = Some(index);
        while let Some(i) = current {
            let object = self.object(i);
            if object.parent.is_some() {
                names.push(object.name.as_str());
            }
            current = object.parent;
        }
        names.reverse();
        normalize(&names.join("/"))
    }

    /// Returns device of the object: its own mount or the mount of its nearest mounted ancestor.
    pub fn device_of(&self, index: FsIndex) -> Option<DeviceId> {
        let mut current = Some(index);
        while let Some(i) = current {
            let object = self.object(i);
            if object.mount.is_some() {
                return object.mount;
            }
            current = object.parent;
        }
        None
    }

    /// Returns device which backs `path`, which need not exist yet.
    ///
    /// The deepest existing prefix of the path is resolved and its device is returned.
    pub fn resolve_mount(&self, path: &str) -> Option<DeviceId> {
        let mut current = ROOT;
        for component in components(path) {
            match self.child(current, component) {
                Some(next) => current = next,
                None => break,
            }
        }
        self.device_of(current)
    }

    /// Creates directory and all missing ancestors. Returns its index.
    pub fn create_dir(&mut self, path: &str) -> Result<FsIndex, FsError> {
        let mut current = ROOT;
        for component in components(path) {
            current = match self.child(current, component) {
                Some(next) => next,
                None => {
                    if self.object(current).as_file().is_some() {
                        return Err(FsError::NotADirectory);
                    }
                    self.insert(current, component, FsKind::Directory(IndexMap::new()))
                }
            };
        }
        match self.object(current).kind {
            FsKind::Directory(_) => Ok(current),
            FsKind::File(_) => Err(FsError::NotADirectory),
        }
    }

    fn insert(&mut self, parent: FsIndex, name: &str, kind: FsKind) -> FsIndex {
        let index = self.alloc(FsObject {
            name: name.to_string(),
            parent: Some(parent),
            mount: None,
            kind,
        });
        if let FsKind::Directory(children) = &mut self.object_mut(parent).kind {
            children.insert(name.to_string(), index);
        }
        index
    }

    fn split_parent(path: &str) -> Result<(String, String), FsError> {
        let normalized = normalize(path);
        match normalized.rfind('/') {
            Some(pos) if normalized.len() > 1 => {
                Ok((normalized[..pos].to_string(), normalized[pos + 1..].to_string()))
            }
            _ => Err(FsError::Root),
        }
    }

    /// Creates file with the given size, creating missing parent directories.
    pub fn create_file(&mut self, path: &str, size: u64) -> Result<FsIndex, FsError> {
        let (parent, name) = Self::split_parent(path)?;
        let parent = self.create_dir(&parent)?;
        if self.child(parent, &name).is_some() {
            return Err(FsError::Exists);
        }
        Ok(self.insert(
            parent,
            &name,
            FsKind::File(FileEntry {
                size,
                access_count: 0,
                migrating: false,
            }),
        ))
    }

    /// Removes object with all its descendants. Returns removed files with the devices they were located on.
    pub fn remove(&mut self, path: &str) -> Result<Vec<(String, u64, Option<DeviceId>)>, FsError> {
        let index = self.resolve(path).ok_or(FsError::NotFound)?;
        if index == ROOT {
            return Err(FsError::Root);
        }
        let mut removed = Vec::new();
        let mut stack = vec![index];
        let mut doomed = Vec::new();
        while let Some(i) = stack.pop() {
            doomed.push(i);
            match &self.object(i).kind {
                FsKind::Directory(children) => stack.extend(children.values().copied()),
                FsKind::File(file) => removed.push((self.path_of(i), file.size, self.device_of(i))),
            }
        }
        let object = self.object(index);
        let (parent, name) = (object.parent, object.name.clone());
        if let Some(parent) = parent {
            if let FsKind::Directory(children) = &mut self.object_mut(parent).kind {
                children.shift_remove(&name);
            }
        }
        for i in doomed {
            self.objects[i] = None;
            self.free.push(i);
        }
        Ok(removed)
    }

    /// Moves object to a new path. Missing parent directories of the new path are created.
    ///
    /// Files of the moved subtree stay on their devices even if the new location is mounted elsewhere.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<(), FsError> {
        let index = self.resolve(from).ok_or(FsError::NotFound)?;
        if index == ROOT {
            return Err(FsError::Root);
        }
        if self.exists(to) {
            return Err(FsError::Exists);
        }
        let (new_parent, new_name) = Self::split_parent(to)?;
        let new_parent = self.create_dir(&new_parent)?;
        let pinned = self.resident_devices(index);
        let object = self.object(index);
        let (old_parent, old_name) = (object.parent, object.name.clone());
        if let Some(parent) = old_parent {
            if let FsKind::Directory(children) = &mut self.object_mut(parent).kind {
                children.shift_remove(&old_name);
            }
        }
        if let FsKind::Directory(children) = &mut self.object_mut(new_parent).kind {
            children.insert(new_name.clone(), index);
        }
        let object = self.object_mut(index);
        object.name = new_name;
        object.parent = Some(new_parent);
        self.pin(pinned);
        Ok(())
    }

    /// Devices of the files in the subtree of `index`.
    fn resident_devices(&self, index: FsIndex) -> Vec<(FsIndex, DeviceId)> {
        let mut result = Vec::new();
        let mut stack = vec![index];
        while let Some(i) = stack.pop() {
            match &self.object(i).kind {
                FsKind::Directory(children) => stack.extend(children.values().copied()),
                FsKind::File(_) => {
                    if let Some(device) = self.device_of(i) {
                        result.push((i, device));
                    }
                }
            }
        }
        result
    }

    /// Mounts every file which ended up on another device back on its previous device.
    fn pin(&mut self, devices: Vec<(FsIndex, DeviceId)>) {
        for (index, device) in devices {
            if self.device_of(index) != Some(device) {
                self.object_mut(index).mount = Some(device);
            }
        }
    }

    /// Mounts directory at `path` on the device. Missing directories are created.
    ///
    /// Only new files are placed according to the mount, existing files of the directory stay where they are. Files
    /// are moved between devices with [`FileTree::relocate`].
    pub fn mount(&mut self, path: &str, device: DeviceId) -> Result<(), FsError> {
        let index = self.create_dir(path)?;
        let pinned = self.resident_devices(index);
        self.object_mut(index).mount = Some(device);
        self.pin(pinned);
        Ok(())
    }

    /// Removes own mount of the directory at `path`. Existing files of the directory stay where they are.
    pub fn unmount(&mut self, path: &str) -> Result<Option<DeviceId>, FsError> {
        let index = self.resolve(path).ok_or(FsError::NotFound)?;
        if self.object(index).as_file().is_some() {
            return Err(FsError::NotADirectory);
        }
        let pinned = self.resident_devices(index);
        let previous = self.object_mut(index).mount.take();
        self.pin(pinned);
        Ok(previous)
    }

    /// Removes every mount of the device.
    pub fn unmount_device(&mut self, device: DeviceId) {
        for object in self.objects.iter_mut().flatten() {
            if object.mount == Some(device) {
                object.mount = None;
            }
        }
    }

    /// Lists own mounts as `(path, device)` in depth-first order.
    pub fn mounts(&self) -> Vec<(String, DeviceId)> {
        self.walk()
            .into_iter()
            .filter_map(|i| self.object(i).mount.map(|d| (self.path_of(i), d)))
            .collect()
    }

    fn walk(&self) -> Vec<FsIndex> {
        let mut order = Vec::new();
        let mut stack = vec![ROOT];
        while let Some(i) = stack.pop() {
            order.push(i);
            if let FsKind::Directory(children) = &self.object(i).kind {
                stack.extend(children.values().rev().copied());
            }
        }
        order
    }

    /// Lists all files in depth-first order.
    pub fn files(&self) -> Vec<(String, FileEntry)> {
        self.walk()
            .into_iter()
            .filter_map(|i| self.object(i).as_file().map(|f| (self.path_of(i), f.clone())))
            .collect()
    }

    /// Lists files located on the device.
    pub fn files_on(&self, device: DeviceId) -> Vec<ResidentFile> {
        self.walk()
            .into_iter()
            .filter(|&i| self.device_of(i) == Some(device))
            .filter_map(|i| {
                self.object(i).as_file().map(|f| ResidentFile {
                    path: self.path_of(i),
                    size: f.size,
                    access_count: f.access_count,
                    migrating: f.migrating,
                })
            })
            .collect()
    }

    /// Sets file size.
    pub fn set_size(&mut self, path: &str, size: u64) -> Result<u64, FsError> {
        let file = self.file_mut(path).ok_or(FsError::NotFound)?;
        Ok(std::mem::replace(&mut file.size, size))
    }

    /// Increments access counter of the file and returns the new value.
    pub fn record_access(&mut self, path: &str) -> Result<u64, FsError> {
        let file = self.file_mut(path).ok_or(FsError::NotFound)?;
        file.access_count += 1;
        Ok(file.access_count)
    }

    /// Sets access counter of the file.
    pub fn set_access_count(&mut self, path: &str, count: u64) -> Result<(), FsError> {
        self.file_mut(path).ok_or(FsError::NotFound)?.access_count = count;
        Ok(())
    }

    /// Sets migrating flag of the file.
    pub fn set_migrating(&mut self, path: &str, migrating: bool) -> Result<(), FsError> {
        self.file_mut(path).ok_or(FsError::NotFound)?.migrating = migrating;
        Ok(())
    }

    /// Mounts file on `device` if it is not already located there.
    pub fn relocate(&mut self, path: &str, device: DeviceId) -> Result<(), FsError> {
        let index = self.resolve(path).ok_or(FsError::NotFound)?;
        let parent_device = self.object(index).parent.and_then(|p| self.device_of(p));
        self.object_mut(index).mount = if parent_device == Some(device) {
            None
        } else {
            Some(device)
        };
        Ok(())
    }
}
