//! 测试用对象存储：记录调用、注入失败、统计并发

use super::{ObjectInfo, ObjectStore};
use crate::core::HeaderSet;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct MockStore {
    objects: Mutex<HashMap<String, (Vec<u8>, HeaderSet)>>,
    fail_put: Mutex<HashSet<String>>,
    fail_delete: Mutex<HashSet<String>>,
    fail_get: AtomicBool,
    fail_list: AtomicBool,
    unsupported: Mutex<HashSet<String>>,
    put_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    put_calls: AtomicUsize,
    put_keys: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_put_delay(self, delay: Duration) -> Self {
        *self.put_delay.lock().unwrap() = delay;
        self
    }

    pub fn insert(&self, key: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (data.to_vec(), HeaderSet::new()));
    }

    pub fn fail_put_for(&self, key: &str) {
        self.fail_put.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_delete_for(&self, key: &str) {
        self.fail_delete.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_get(&self) {
        self.fail_get.store(true, Ordering::SeqCst);
    }

    pub fn fail_list(&self) {
        self.fail_list.store(true, Ordering::SeqCst);
    }

    /// 模拟后端无法保存某个 header
    pub fn reject_header(&self, name: &str) {
        self.unsupported.lock().unwrap().insert(name.to_string());
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).map(|(d, _)| d.clone())
    }

    pub fn headers(&self, key: &str) -> Option<HeaderSet> {
        self.objects.lock().unwrap().get(key).map(|(_, h)| h.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn put_keys(&self) -> Vec<String> {
        let mut keys = self.put_keys.lock().unwrap().clone();
        keys.sort();
        keys
    }

    pub fn deleted(&self) -> Vec<String> {
        let mut keys = self.deleted.lock().unwrap().clone();
        keys.sort();
        keys
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.put_calls.store(0, Ordering::SeqCst);
        self.put_keys.lock().unwrap().clear();
        self.deleted.lock().unwrap().clear();
        self.peak_in_flight.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MockStore {
    async fn put(&self, key: &str, data: Vec<u8>, headers: &HeaderSet) -> Result<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        self.put_keys.lock().unwrap().push(key.to_string());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.put_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_put.lock().unwrap().contains(key) {
            anyhow::bail!("injected put failure");
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (data, headers.clone()));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if self.fail_get.load(Ordering::SeqCst) {
            anyhow::bail!("injected get failure");
        }
        Ok(self.object(key))
    }

    async fn head(&self, key: &str) -> Result<Option<HeaderSet>> {
        Ok(self.headers(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.fail_delete.lock().unwrap().contains(key) {
            anyhow::bail!("injected delete failure");
        }
        self.deleted.lock().unwrap().push(key.to_string());
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    fn unsupported_headers(&self, headers: &HeaderSet) -> Vec<String> {
        let unsupported = self.unsupported.lock().unwrap();
        let mut names: Vec<String> = headers
            .keys()
            .filter(|name| unsupported.contains(*name))
            .cloned()
            .collect();
        names.sort();
        names
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<ObjectInfo>> {
        if self.fail_list.load(Ordering::SeqCst) {
            anyhow::bail!("injected list failure");
        }
        let prefix = prefix.unwrap_or("");
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, (d, _))| ObjectInfo {
                key: k.clone(),
                size: d.len() as u64,
                etag: None,
            })
            .collect())
    }

    fn name(&self) -> &str {
        "mock://"
    }
}
