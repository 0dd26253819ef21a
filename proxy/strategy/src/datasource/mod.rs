// Copyright 2022 SphereEx Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

pub mod conn;
pub mod exception_sorter;
pub mod marker;
pub mod optional;
pub mod repository;
pub mod selector;

pub use self::{
    conn::{PhysicalConn, ResultSet, Row, TracedConn},
    exception_sorter::ExceptionSorter,
    marker::SmartDataSource,
    optional::Optional,
    repository::{DataSourceConn, DataSourceRepository},
    selector::{DataSourceSelector, MemberSpec},
};
