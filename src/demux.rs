//! Demultiplexor
//!
//! Runs the same operation against one master and N slave databases.
//! Operations are closures taking an owned handle, so any async method of
//! the wrapper can be dispatched:
//!
//! ```ignore
//! let counts = demux.on_slaves(|db| async move { db.count(None).await }).await;
//! ```

use std::future::Future;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::logger;

/// One master and any number of slaves
#[derive(Debug, Clone)]
pub struct Demultiplexor<D> {
    master: Option<D>,
    slaves: Vec<D>,
}

impl<D: Database + Clone> Demultiplexor<D> {
    /// Missing slaves are dropped
    pub fn new(master: Option<D>, slaves: impl IntoIterator<Item = Option<D>>) -> Self {
        Self {
            master,
            slaves: slaves.into_iter().flatten().collect(),
        }
    }

    pub fn master(&self) -> Option<&D> {
        self.master.as_ref()
    }

    pub fn slaves(&self) -> &[D] {
        &self.slaves
    }

    pub fn slave_count(&self) -> usize {
        self.slaves.len()
    }

    /// Connect master, then every slave; stops at the first failure
    pub async fn connect(&mut self) -> Result<()> {
        if let Some(master) = self.master.as_mut() {
            master.connect().await?;
        }
        for slave in &mut self.slaves {
            slave.connect().await?;
        }
        Ok(())
    }

    pub async fn cleanup(&mut self) {
        if let Some(master) = self.master.as_mut() {
            master.cleanup().await;
        }
        for slave in &mut self.slaves {
            slave.cleanup().await;
        }
    }

    /// Run `f` on the master; `None` without a master
    pub async fn on_master<T, F, Fut>(&self, f: F) -> Result<Option<T>>
    where
        F: FnOnce(D) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some(master) = self.master.clone() else {
            return Ok(None);
        };

        let info = master.db_info();
        f(master).await.map(Some).map_err(|e| {
            logger::report(&e, &format!("Demultiplexor master {}", info));
            e
        })
    }

    /// Run `f` on slave `n`
    pub async fn on_slave<T, F, Fut>(&self, n: usize, f: F) -> Result<T>
    where
        F: FnOnce(D) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let slave = self.slaves.get(n).cloned().ok_or_else(|| {
            Error::DemultiplexorCritical(format!(
                "slave index out of range! {} >= {}",
                n,
                self.slaves.len()
            ))
        })?;

        let info = slave.db_info();
        f(slave).await.map_err(|e| {
            logger::report(&e, &format!("Demultiplexor slave #{} {}", n, info));
            e
        })
    }

    /// Run `f` on every slave in order; one result per slave
    pub async fn on_slaves<T, F, Fut>(&self, mut f: F) -> Vec<Result<T>>
    where
        F: FnMut(D) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut results = Vec::with_capacity(self.slaves.len());
        for n in 0..self.slaves.len() {
            results.push(self.on_slave(n, &mut f).await);
        }
        results
    }

    /// Run `f` on the master and then on every slave
    pub async fn on_all<T, F, Fut>(&self, mut f: F) -> (Result<Option<T>>, Vec<Result<T>>)
    where
        F: FnMut(D) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let master = self.on_master(&mut f).await;
        let slaves = self.on_slaves(&mut f).await;
        (master, slaves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Debug, Clone, PartialEq)]
    struct FakeDb {
        name: String,
        connected: bool,
    }

    fn fake(name: &str) -> FakeDb {
        FakeDb {
            name: name.to_string(),
            connected: false,
        }
    }

    #[async_trait]
    impl Database for FakeDb {
        async fn connect(&mut self) -> Result<()> {
            if self.name == "down" {
                return Err(Error::DbConnect {
                    db_info: self.name.clone(),
                    attempts: 1,
                    reason: "refused".into(),
                });
            }
            self.connected = true;
            Ok(())
        }

        async fn cleanup(&mut self) {
            self.connected = false;
        }

        fn db_info(&self) -> String {
            self.name.clone()
        }

        fn is_connected(&self) -> bool {
            self.connected
        }
    }

    fn demux() -> Demultiplexor<FakeDb> {
        Demultiplexor::new(
            Some(fake("master")),
            vec![Some(fake("s1")), None, Some(fake("s2"))],
        )
    }

    #[test]
    fn test_none_slaves_are_dropped() {
        let d = demux();
        assert_eq!(d.slave_count(), 2);
        assert_eq!(d.slaves()[1].name, "s2");
        assert_eq!(d.master().unwrap().name, "master");
    }

    #[tokio::test]
    async fn test_connect_and_cleanup_all() {
        let mut d = demux();
        d.connect().await.unwrap();
        assert!(d.master().unwrap().is_connected());
        assert!(d.slaves().iter().all(|s| s.is_connected()));

        d.cleanup().await;
        assert!(d.slaves().iter().all(|s| !s.is_connected()));
    }

    #[tokio::test]
    async fn test_connect_stops_on_failure() {
        let mut d = Demultiplexor::new(None, vec![Some(fake("down")), Some(fake("s2"))]);
        assert!(d.connect().await.is_err());
        assert!(!d.slaves()[1].is_connected());
    }

    #[tokio::test]
    async fn test_dispatch() {
        let d = demux();

        let master = d.on_master(|db| async move { Ok(db.name) }).await.unwrap();
        assert_eq!(master.as_deref(), Some("master"));

        let second = d.on_slave(1, |db| async move { Ok(db.name.len()) }).await.unwrap();
        assert_eq!(second, 2);

        let names: Vec<String> = d
            .on_slaves(|db| async move { Ok(db.name) })
            .await
            .into_iter()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(names, vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn test_slave_errors_stay_in_place() {
        let d = demux();
        let results = d
            .on_slaves(|db| async move {
                if db.name == "s1" {
                    Err(Error::Demultiplexor("no such table".into()))
                } else {
                    Ok(db.name)
                }
            })
            .await;

        assert!(results[0].is_err());
        assert_eq!(results[1].as_deref().unwrap(), "s2");
    }

    #[tokio::test]
    async fn test_out_of_range_slave_is_critical() {
        let d = demux();
        let err = d.on_slave(2, |db| async move { Ok(db) }).await.unwrap_err();
        assert!(matches!(err, Error::DemultiplexorCritical(_)));
        assert_eq!(err.exit_code(), 4);
    }

    #[tokio::test]
    async fn test_on_all_without_master() {
        let d = Demultiplexor::new(None, vec![Some(fake("s1"))]);
        let (master, slaves) = d.on_all(|db| async move { Ok(db.name) }).await;
        assert!(master.unwrap().is_none());
        assert_eq!(slaves.len(), 1);
    }
}
