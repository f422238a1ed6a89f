//! Keyed entity tables: filesystem hosts, users, groups, quotas and
//! metadata hosts

use crate::error::{NamespaceError, NsResult};
use nsmeta_journal::ops::{
    GroupInfo, GroupModify, HostInfo, HostModify, MdHostInfo, QuotaLimits, UserInfo,
};
use std::collections::HashMap;

/// A filesystem node
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Host {
    pub info: HostInfo,
    /// Filesystem-node group, empty if none
    pub fsngroup: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Entities {
    hosts: HashMap<String, Host>,
    users: HashMap<String, UserInfo>,
    groups: HashMap<String, GroupInfo>,
    user_quotas: HashMap<String, QuotaLimits>,
    group_quotas: HashMap<String, QuotaLimits>,
    mdhosts: HashMap<String, MdHostInfo>,
}

fn merge_list(list: &mut Vec<String>, add: &[String], del: &[String]) {
    list.retain(|x| !del.contains(x));
    for name in add {
        if !list.contains(name) {
            list.push(name.clone());
        }
    }
}

impl Entities {
    #[must_use]
    pub fn host(&self, name: &str) -> Option<&Host> {
        self.hosts.get(name)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    pub fn host_add(&mut self, info: &HostInfo) -> NsResult<()> {
        if self.hosts.contains_key(&info.hostname) {
            return Err(NamespaceError::already_exists(format!(
                "host {}",
                info.hostname
            )));
        }
        self.hosts.insert(
            info.hostname.clone(),
            Host {
                info: info.clone(),
                fsngroup: String::new(),
            },
        );
        Ok(())
    }

    pub fn host_modify(&mut self, arg: &HostModify) -> NsResult<()> {
        let host = self
            .hosts
            .get_mut(&arg.info.hostname)
            .ok_or_else(|| NamespaceError::no_such_object(format!("host {}", arg.info.hostname)))?;
        let mut aliases = std::mem::take(&mut host.info.aliases);
        host.info = arg.info.clone();
        merge_list(&mut aliases, &arg.add_aliases, &arg.del_aliases);
        host.info.aliases = aliases;
        Ok(())
    }

    pub fn host_remove(&mut self, hostname: &str) -> NsResult<()> {
        self.hosts
            .remove(hostname)
            .map(|_| ())
            .ok_or_else(|| NamespaceError::no_such_object(format!("host {hostname}")))
    }

    pub fn fsngroup_modify(&mut self, hostname: &str, fsngroup: &str) -> NsResult<()> {
        let host = self
            .hosts
            .get_mut(hostname)
            .ok_or_else(|| NamespaceError::no_such_object(format!("host {hostname}")))?;
        fsngroup.clone_into(&mut host.fsngroup);
        Ok(())
    }

    #[must_use]
    pub fn user(&self, name: &str) -> Option<&UserInfo> {
        self.users.get(name)
    }

    pub fn user_add(&mut self, info: &UserInfo) -> NsResult<()> {
        if self.users.contains_key(&info.username) {
            return Err(NamespaceError::already_exists(format!(
                "user {}",
                info.username
            )));
        }
        self.users.insert(info.username.clone(), info.clone());
        Ok(())
    }

    pub fn user_modify(&mut self, info: &UserInfo) -> NsResult<()> {
        let user = self
            .users
            .get_mut(&info.username)
            .ok_or_else(|| NamespaceError::NoSuchUser(info.username.clone()))?;
        user.clone_from(info);
        Ok(())
    }

    /// Removes the user and its group memberships
    pub fn user_remove(&mut self, username: &str) -> NsResult<()> {
        if self.users.remove(username).is_none() {
            return Err(NamespaceError::NoSuchUser(username.to_string()));
        }
        for group in self.groups.values_mut() {
            group.usernames.retain(|u| u != username);
        }
        Ok(())
    }

    #[must_use]
    pub fn group(&self, name: &str) -> Option<&GroupInfo> {
        self.groups.get(name)
    }

    fn check_users(&self, names: &[String]) -> NsResult<()> {
        match names.iter().find(|u| !self.users.contains_key(*u)) {
            Some(missing) => Err(NamespaceError::NoSuchUser(missing.clone())),
            None => Ok(()),
        }
    }

    pub fn group_add(&mut self, info: &GroupInfo) -> NsResult<()> {
        if self.groups.contains_key(&info.groupname) {
            return Err(NamespaceError::already_exists(format!(
                "group {}",
                info.groupname
            )));
        }
        self.check_users(&info.usernames)?;
        self.groups.insert(info.groupname.clone(), info.clone());
        Ok(())
    }

    pub fn group_modify(&mut self, arg: &GroupModify) -> NsResult<()> {
        if !self.groups.contains_key(&arg.info.groupname) {
            return Err(NamespaceError::NoSuchGroup(arg.info.groupname.clone()));
        }
        self.check_users(&arg.info.usernames)?;
        self.check_users(&arg.add_users)?;
        let mut members = arg.info.usernames.clone();
        merge_list(&mut members, &arg.add_users, &arg.del_users);
        if let Some(group) = self.groups.get_mut(&arg.info.groupname) {
            group.usernames = members;
        }
        Ok(())
    }

    pub fn group_remove(&mut self, groupname: &str) -> NsResult<()> {
        self.groups
            .remove(groupname)
            .map(|_| ())
            .ok_or_else(|| NamespaceError::NoSuchGroup(groupname.to_string()))
    }

    fn quota_table(&mut self, is_group: bool, name: &str) -> NsResult<&mut HashMap<String, QuotaLimits>> {
        if is_group {
            if !self.groups.contains_key(name) {
                return Err(NamespaceError::NoSuchGroup(name.to_string()));
            }
            Ok(&mut self.group_quotas)
        } else {
            if !self.users.contains_key(name) {
                return Err(NamespaceError::NoSuchUser(name.to_string()));
            }
            Ok(&mut self.user_quotas)
        }
    }

    #[must_use]
    pub fn quota(&self, is_group: bool, name: &str) -> Option<&QuotaLimits> {
        let table = if is_group {
            &self.group_quotas
        } else {
            &self.user_quotas
        };
        table.get(name).filter(|q| q.on_db)
    }

    /// Add or replace the limits of a user or group quota
    pub fn quota_set(&mut self, is_group: bool, name: &str, quota: &QuotaLimits) -> NsResult<()> {
        let table = self.quota_table(is_group, name)?;
        let mut quota = quota.clone();
        quota.on_db = true;
        table.insert(name.to_string(), quota);
        Ok(())
    }

    /// The limits stay cached but are no longer backed by the store
    pub fn quota_remove(&mut self, is_group: bool, name: &str) -> NsResult<()> {
        let table = self.quota_table(is_group, name)?;
        match table.get_mut(name) {
            Some(q) if q.on_db => {
                q.on_db = false;
                Ok(())
            }
            _ => Err(NamespaceError::no_such_object(format!("quota of {name}"))),
        }
    }

    #[must_use]
    pub fn mdhost(&self, name: &str) -> Option<&MdHostInfo> {
        self.mdhosts.get(name)
    }

    pub fn mdhost_add(&mut self, info: &MdHostInfo) -> NsResult<()> {
        if self.mdhosts.contains_key(&info.name) {
            return Err(NamespaceError::already_exists(format!(
                "metadata host {}",
                info.name
            )));
        }
        self.mdhosts.insert(info.name.clone(), info.clone());
        Ok(())
    }

    pub fn mdhost_modify(&mut self, info: &MdHostInfo) -> NsResult<()> {
        let mdhost = self
            .mdhosts
            .get_mut(&info.name)
            .ok_or_else(|| NamespaceError::no_such_object(format!("metadata host {}", info.name)))?;
        mdhost.clone_from(info);
        Ok(())
    }

    pub fn mdhost_remove(&mut self, name: &str) -> NsResult<()> {
        self.mdhosts
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| NamespaceError::no_such_object(format!("metadata host {name}")))
    }
}
