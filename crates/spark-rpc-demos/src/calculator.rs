//! 计算器服务。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 业务计算与调用形态解耦：质因数分解、平均值、滑动最大值都是纯函数或纯状态机，
//!   处理器只负责把它们接到流上，便于单独做性质测试。
//!
//! ## 契约（What）
//! - `PrimeNumberDecomposition`：按发现顺序（从小到大）逐个发送质因数；1 没有质因数，
//!   得到空序列并以 OK 结束；0 与负数没有质因数分解，返回 `InvalidArgument`，
//!   不以空序列冒充成功；
//! - `ComputeAverage`：空输入返回 `InvalidArgument`，不会出现除零；
//! - `FindMaximum`：只在运行最大值严格增大时发送响应，其余请求静默跳过；
//! - `SquareRoot`：负数返回 `InvalidArgument`，绝不以 NaN 冒充成功。

use serde::{Deserialize, Serialize};
use spark_rpc::{Method, Pattern, ServiceTable, Status};
use tracing::{debug, info};

pub const SUM: Method<SumRequest, SumResponse> =
    Method::new("calculator.CalculatorService/Sum", Pattern::Unary);
pub const PRIME_NUMBER_DECOMPOSITION: Method<
    PrimeNumberDecompositionRequest,
    PrimeNumberDecompositionResponse,
> = Method::new(
    "calculator.CalculatorService/PrimeNumberDecomposition",
    Pattern::ServerStreaming,
);
pub const COMPUTE_AVERAGE: Method<ComputeAverageRequest, ComputeAverageResponse> = Method::new(
    "calculator.CalculatorService/ComputeAverage",
    Pattern::ClientStreaming,
);
pub const FIND_MAXIMUM: Method<FindMaximumRequest, FindMaximumResponse> = Method::new(
    "calculator.CalculatorService/FindMaximum",
    Pattern::BidiStreaming,
);
pub const SQUARE_ROOT: Method<SquareRootRequest, SquareRootResponse> =
    Method::new("calculator.CalculatorService/SquareRoot", Pattern::Unary);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumRequest {
    pub first_number: i64,
    pub second_number: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumResponse {
    pub result: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimeNumberDecompositionRequest {
    pub number: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimeNumberDecompositionResponse {
    pub prime_factor: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeAverageRequest {
    pub number: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputeAverageResponse {
    pub result: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindMaximumRequest {
    pub number: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindMaximumResponse {
    pub maximum: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquareRootRequest {
    pub number: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SquareRootResponse {
    pub number_root: f64,
}

/// 按从小到大的顺序产出 `n` 的质因数（含重数）。
///
/// 试除到 `√n` 为止，剩余大于 1 的部分本身即为最后一个质因数。
#[derive(Clone, Debug)]
pub struct PrimeFactors {
    remaining: u64,
    divisor: u64,
}

impl PrimeFactors {
    pub fn new(n: u64) -> Self {
        Self {
            remaining: n,
            divisor: 2,
        }
    }
}

impl Iterator for PrimeFactors {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        while self.remaining > 1 {
            let beyond_root = self
                .divisor
                .checked_mul(self.divisor)
                .is_none_or(|square| square > self.remaining);
            if beyond_root {
                let last = self.remaining;
                self.remaining = 1;
                return Some(last);
            }
            if self.remaining % self.divisor == 0 {
                self.remaining /= self.divisor;
                return Some(self.divisor);
            }
            self.divisor += 1;
        }
        None
    }
}

pub fn prime_factors(n: u64) -> Vec<u64> {
    PrimeFactors::new(n).collect()
}

/// 增量平均值累加器。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Mean {
    sum: i128,
    count: u64,
}

impl Mean {
    pub fn push(&mut self, number: i64) {
        self.sum += i128::from(number);
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// 空输入没有平均值。
    pub fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum as f64 / self.count as f64)
    }
}

pub fn average(numbers: &[i64]) -> Option<f64> {
    let mut mean = Mean::default();
    for &number in numbers {
        mean.push(number);
    }
    mean.value()
}

/// 运行最大值：仅在严格增大时报告新值。
///
/// 初值为“尚无观测”而不是 0：首个值总是被报告，全为负数的输入同样得到各个前缀最大值。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunningMax {
    current: Option<i64>,
}

impl RunningMax {
    pub fn observe(&mut self, number: i64) -> Option<i64> {
        match self.current {
            Some(current) if number <= current => None,
            _ => {
                self.current = Some(number);
                Some(number)
            }
        }
    }

    pub fn current(&self) -> Option<i64> {
        self.current
    }
}

pub fn checked_sum(first: i64, second: i64) -> Result<i64, Status> {
    first
        .checked_add(second)
        .ok_or_else(|| Status::invalid_argument(format!("{first} + {second} overflows")))
}

pub fn square_root(number: i64) -> Result<f64, Status> {
    if number < 0 {
        return Err(Status::invalid_argument(format!(
            "the number cannot be negative: {number}"
        )));
    }
    Ok((number as f64).sqrt())
}

/// 构造计算器服务的方法表。
pub fn calculator_service() -> ServiceTable {
    ServiceTable::new()
        .unary(SUM, |_ctx, request: SumRequest| async move {
            info!(?request, "Sum invoked");
            let result = checked_sum(request.first_number, request.second_number)?;
            Ok(SumResponse { result })
        })
        .server_streaming(
            PRIME_NUMBER_DECOMPOSITION,
            |_ctx, request: PrimeNumberDecompositionRequest, mut sink| async move {
                info!(number = request.number, "PrimeNumberDecomposition invoked");
                let number = u64::try_from(request.number)
                    .ok()
                    .filter(|number| *number > 0)
                    .ok_or_else(|| {
                        Status::invalid_argument(format!(
                            "the number must be positive: {}",
                            request.number
                        ))
                    })?;
                for factor in PrimeFactors::new(number) {
                    debug!(factor, "prime factor found");
                    let prime_factor = i64::try_from(factor)
                        .map_err(|_| Status::internal("prime factor out of range"))?;
                    sink.send(PrimeNumberDecompositionResponse { prime_factor })
                        .await?;
                    tokio::task::yield_now().await;
                }
                Ok(())
            },
        )
        .client_streaming(COMPUTE_AVERAGE, |_ctx, mut requests| async move {
            let mut mean = Mean::default();
            while let Some(request) = requests.message().await? {
                mean.push(request.number);
            }
            info!(count = mean.count(), "ComputeAverage received every number");
            let result = mean
                .value()
                .ok_or_else(|| Status::invalid_argument("cannot average an empty sequence"))?;
            Ok(ComputeAverageResponse { result })
        })
        .bidi_streaming(FIND_MAXIMUM, |_ctx, mut requests, mut sink| async move {
            let mut running = RunningMax::default();
            while let Some(request) = requests.message().await? {
                if let Some(maximum) = running.observe(request.number) {
                    sink.send(FindMaximumResponse { maximum }).await?;
                }
            }
            Ok(())
        })
        .unary(SQUARE_ROOT, |_ctx, request: SquareRootRequest| async move {
            let number_root = square_root(request.number)?;
            Ok(SquareRootResponse { number_root })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark_rpc::Code;

    #[test]
    fn prime_factors_are_ascending() {
        assert_eq!(prime_factors(12), vec![2, 2, 3]);
        assert_eq!(prime_factors(120), vec![2, 2, 2, 3, 5]);
        assert_eq!(prime_factors(97), vec![97]);
        assert!(prime_factors(1).is_empty());
    }

    #[test]
    fn large_input_decomposes_in_order() {
        assert_eq!(prime_factors(21_231_654_321_654), vec![2, 3, 3, 7, 719, 1427, 164_233]);
    }

    #[test]
    fn average_of_empty_input_is_undefined() {
        assert_eq!(average(&[3, 5, 9, 54, 23]), Some(18.8));
        assert_eq!(average(&[]), None);
    }

    #[test]
    fn running_max_skips_non_increases() {
        let mut running = RunningMax::default();
        let emitted: Vec<i64> = [4, 7, 2, 19, 4, 6, 32]
            .into_iter()
            .filter_map(|number| running.observe(number))
            .collect();
        assert_eq!(emitted, vec![4, 7, 19, 32]);
        assert_eq!(running.current(), Some(32));
    }

    #[test]
    fn running_max_reports_negative_only_input() {
        let mut running = RunningMax::default();
        let emitted: Vec<i64> = [-5, -9, -2, -2]
            .into_iter()
            .filter_map(|number| running.observe(number))
            .collect();
        assert_eq!(emitted, vec![-5, -2]);
    }

    #[test]
    fn negative_square_root_is_invalid_argument() {
        let err = square_root(-2).expect_err("负数开方必须失败");
        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(square_root(16), Ok(4.0));
    }

    #[test]
    fn overflowing_sum_is_rejected() {
        assert_eq!(checked_sum(7, 8), Ok(15));
        assert!(checked_sum(i64::MAX, 1).is_err());
    }
}
