//! 计算器业务函数的性质测试。
//!
//! # 教案式说明
//! - **Why**：质因数分解、平均值与运行最大值都是流式处理器背后的纯函数，
//!   用随机输入检验其不变量比枚举样例更能覆盖边界；
//! - **How**：`proptest` 生成输入，逐条检查乘积、顺序、单调性等性质；
//! - **What**：性质不成立时 `proptest` 会缩小反例并报告。

use proptest::prelude::*;
use spark_rpc_demos::calculator::{RunningMax, average, prime_factors};

fn is_prime(n: u64) -> bool {
    n >= 2 && (2..).take_while(|d| d * d <= n).all(|d| n % d != 0)
}

proptest! {
    #[test]
    fn prime_factors_multiply_back_in_ascending_order(n in 2u64..1_000_000) {
        let factors = prime_factors(n);
        prop_assert_eq!(factors.iter().product::<u64>(), n);
        prop_assert!(factors.windows(2).all(|pair| pair[0] <= pair[1]));
        prop_assert!(factors.iter().all(|&factor| is_prime(factor)));
    }

    #[test]
    fn average_lies_between_extremes(numbers in prop::collection::vec(-1_000_000i64..1_000_000, 1..64)) {
        let mean = average(&numbers).expect("非空输入必有平均值");
        let min = *numbers.iter().min().expect("非空") as f64;
        let max = *numbers.iter().max().expect("非空") as f64;
        prop_assert!(mean >= min && mean <= max);
        let total: i64 = numbers.iter().sum();
        prop_assert!((mean * numbers.len() as f64 - total as f64).abs() < 1e-3);
    }

    #[test]
    fn running_max_emits_strictly_increasing_prefix_maxima(numbers in prop::collection::vec(any::<i64>(), 0..64)) {
        let mut running = RunningMax::default();
        let emitted: Vec<i64> = numbers
            .iter()
            .filter_map(|&number| running.observe(number))
            .collect();
        prop_assert!(emitted.windows(2).all(|pair| pair[0] < pair[1]));
        prop_assert_eq!(emitted.last().copied(), numbers.iter().max().copied());
        prop_assert_eq!(running.current(), numbers.iter().max().copied());
    }
}

#[test]
fn documented_examples_hold() {
    assert_eq!(prime_factors(12), vec![2, 2, 3]);
    assert_eq!(average(&[3, 5, 9, 54, 23]), Some(18.8));
    assert_eq!(average(&[]), None);
}
