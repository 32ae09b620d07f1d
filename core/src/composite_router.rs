// Copyright 2025 HEM Sp. z o.o.
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

use log::{debug, warn};

use crate::definitions::ConnectionType;
use crate::errors::RoutingError;

/// Reduces per-flag results to one: true only if every result is true.
///
/// An empty set of results yields `empty_default` rather than a vacuous `true`.
pub fn unanimous<I>(results: I, empty_default: bool) -> bool
where
    I: IntoIterator<Item = bool>,
{
    let mut seen_any = false;
    for result in results {
        if !result {
            return false;
        }
        seen_any = true;
    }
    if seen_any {
        true
    } else {
        empty_default
    }
}

/// Turns a request over several media classes into one call per elementary class.
///
/// Sub-operations are independent: a failed class never rolls back a class that was
/// already applied. The aggregate result is `false` as soon as any class failed, which is
/// how a partial failure is reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompositeOperationRouter {
    empty_result: bool,
}

impl CompositeOperationRouter {
    /// `empty_result` is returned when a request decomposes into no elementary flags.
    pub fn new(empty_result: bool) -> Self {
        Self { empty_result }
    }

    /// Runs `per_flag` once for every elementary flag of `flags`, in bit order.
    ///
    /// All classes are attempted even after one reports `false`. An `Err` from `per_flag`
    /// stops the sequence and is returned as is; classes handled before it keep their effect.
    pub fn route<F>(&self, flags: ConnectionType, mut per_flag: F) -> Result<bool, RoutingError>
    where
        F: FnMut(ConnectionType) -> Result<bool, RoutingError>,
    {
        if flags.is_empty() {
            return Err(RoutingError::NoneFlag);
        }

        let mut results = Vec::with_capacity(flags.bits().count_ones() as usize);
        for flag in flags.elementary() {
            let ok = per_flag(flag)?;
            if !ok {
                debug!("Sub-operation for {} failed", flag);
            }
            results.push(ok);
        }

        let all_ok = unanimous(results.iter().copied(), self.empty_result);
        if !all_ok && results.iter().any(|ok| *ok) {
            warn!("Operation on {} applied only partially", flags);
        }
        Ok(all_ok)
    }

    /// Evaluates a read query per elementary flag and combines the answers unanimously.
    pub fn query<F>(&self, flags: ConnectionType, mut per_flag: F) -> Result<bool, RoutingError>
    where
        F: FnMut(ConnectionType) -> Result<bool, RoutingError>,
    {
        if flags.is_empty() {
            return Err(RoutingError::NoneFlag);
        }
        let mut results = Vec::new();
        for flag in flags.elementary() {
            results.push(per_flag(flag)?);
        }
        Ok(unanimous(results, self.empty_result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unanimous_requires_every_result() {
        assert!(unanimous([true, true], false));
        assert!(!unanimous([true, false], true));
        assert!(!unanimous([false, true], true));
    }

    #[test]
    fn unanimous_uses_default_for_empty_input() {
        assert!(!unanimous(std::iter::empty(), false));
        assert!(unanimous(std::iter::empty(), true));
    }

    #[test]
    fn route_rejects_none() {
        let router = CompositeOperationRouter::default();
        let result = router.route(ConnectionType::empty(), |_| Ok(true));
        assert_eq!(result, Err(RoutingError::NoneFlag));
    }

    #[test]
    fn route_visits_every_flag_in_order_even_after_failure() {
        let router = CompositeOperationRouter::default();
        let mut visited = Vec::new();
        let all = ConnectionType::Usb | ConnectionType::Video | ConnectionType::Audio;

        let result = router
            .route(all, |flag| {
                visited.push(flag);
                Ok(flag != ConnectionType::Audio)
            })
            .unwrap();

        assert!(!result);
        assert_eq!(visited, vec![ConnectionType::Audio, ConnectionType::Video, ConnectionType::Usb]);
    }

    #[test]
    fn route_succeeds_only_when_all_flags_succeed() {
        let router = CompositeOperationRouter::default();
        assert!(router.route(ConnectionType::AudioVideo, |_| Ok(true)).unwrap());
        assert!(!router.route(ConnectionType::AudioVideo, |f| Ok(f == ConnectionType::Audio)).unwrap());
    }

    #[test]
    fn route_error_stops_sequence_without_undoing_earlier_flags() {
        let router = CompositeOperationRouter::default();
        let mut applied = Vec::new();

        let result = router.route(ConnectionType::AudioVideo, |flag| {
            if flag == ConnectionType::Video {
                return Err(RoutingError::UnknownOutput(4));
            }
            applied.push(flag);
            Ok(true)
        });

        assert_eq!(result, Err(RoutingError::UnknownOutput(4)));
        assert_eq!(applied, vec![ConnectionType::Audio]);
    }

    #[test]
    fn query_combines_answers_unanimously() {
        let router = CompositeOperationRouter::default();
        assert!(router.query(ConnectionType::Video, |_| Ok(true)).unwrap());
        assert!(!router.query(ConnectionType::AudioVideo, |f| Ok(f == ConnectionType::Video)).unwrap());
        assert_eq!(router.query(ConnectionType::empty(), |_| Ok(true)), Err(RoutingError::NoneFlag));
    }
}
